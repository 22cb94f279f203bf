//! CSV decoding and batching
//!
//! Window boundaries from the reader fall anywhere, including mid-row; the
//! decoder sees one continuous byte stream.

use bytes::Bytes;
use csv_async::{AsyncReaderBuilder, ErrorKind};
use futures::stream::{Stream, StreamExt, TryStreamExt};
use std::io;
use tally_common::types::ExpenseRecord;
use tokio_util::io::StreamReader;

use crate::error::{IngestError, IngestResult};

/// Records that move through classification and aggregation together
pub type Chunk = Vec<ExpenseRecord>;

/// Decode a CSV byte stream with a header row into records, in row order
///
/// A malformed row ends the stream with [`IngestError::Decode`]. Errors from
/// the byte stream itself come back out unchanged.
pub fn decode_records<S>(bytes: S) -> impl Stream<Item = IngestResult<ExpenseRecord>> + Send
where
    S: Stream<Item = IngestResult<Bytes>> + Send + 'static,
{
    let reader = StreamReader::new(Box::pin(bytes.map_err(io::Error::other)));

    AsyncReaderBuilder::new()
        .has_headers(true)
        .create_deserializer(reader)
        .into_deserialize::<ExpenseRecord>()
        .map(|row| row.map_err(decode_error))
}

fn decode_error(err: csv_async::Error) -> IngestError {
    let position = err.position().map(|p| p.line());
    match err.into_kind() {
        ErrorKind::Io(io_err) => match io_err.into_inner() {
            Some(inner) => match inner.downcast::<IngestError>() {
                Ok(ingest) => *ingest,
                Err(other) => IngestError::Transfer(other.to_string()),
            },
            None => IngestError::Transfer("byte stream failed".to_string()),
        },
        kind => IngestError::Decode(match position {
            Some(line) => format!("line {}: {:?}", line, kind),
            None => format!("{:?}", kind),
        }),
    }
}

/// Group records into ordered chunks of `batch_size`
///
/// The final chunk holds whatever remains and may be shorter. An empty input
/// produces no chunks.
pub fn batch_records<S>(
    records: S,
    batch_size: usize,
) -> impl Stream<Item = IngestResult<Chunk>> + Send
where
    S: Stream<Item = IngestResult<ExpenseRecord>> + Send,
{
    records
        .try_chunks(batch_size.max(1))
        // Records buffered ahead of a failure are dropped with it
        .map_err(|err| err.1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::stream;

    const HEADER: &str = "expenseId,companyId,reportId,companyName,amount,image\n";

    fn windows(parts: &[&str]) -> impl Stream<Item = IngestResult<Bytes>> + Send + 'static {
        let owned: Vec<IngestResult<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn test_rows_split_across_windows() {
        let csv = format!("{}e1,c1,r1,Acme,10.00,img1\ne2,c1,r1,Acme,0,img2\n", HEADER);
        let (a, b) = csv.split_at(HEADER.len() + 9);

        let records: Vec<ExpenseRecord> =
            decode_records(windows(&[a, b])).try_collect().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].expense_id, "e1");
        assert_eq!(records[0].company_name, "Acme");
        assert_eq!(records[1].amount, "0");
        assert!(records.iter().all(|r| r.status.is_none()));
    }

    #[tokio::test]
    async fn test_malformed_row_fails_decode() {
        let csv = format!("{}e1,c1,r1,Acme,10.00,img1\ne2,c1\n", HEADER);
        let results: Vec<_> = decode_records(windows(&[&csv])).collect().await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(IngestError::Decode(_))));
    }

    #[tokio::test]
    async fn test_transfer_error_passes_through() {
        let bytes = stream::iter(vec![
            Ok(Bytes::from_static(HEADER.as_bytes())),
            Err(IngestError::Transfer("Missing ContentRange in response".to_string())),
        ]);

        let err = decode_records(bytes)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Transfer(ref m) if m.contains("ContentRange")));
    }

    #[tokio::test]
    async fn test_batches_flush_partial_tail() {
        let records = (0..5).map(|i| {
            Ok(ExpenseRecord {
                expense_id: format!("e{}", i),
                company_id: "c1".to_string(),
                report_id: "r1".to_string(),
                company_name: String::new(),
                amount: "1.00".to_string(),
                image: String::new(),
                status: None,
            })
        });

        let chunks: Vec<Chunk> = batch_records(stream::iter(records), 2)
            .try_collect()
            .await
            .unwrap();

        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[2][0].expense_id, "e4");
    }

    #[tokio::test]
    async fn test_empty_input_yields_no_chunks() {
        let chunks: Vec<Chunk> = batch_records(stream::empty(), 10).try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }
}
