use serde::{Deserialize, Serialize};

/// Queue payload for one ingestion run
///
/// One message per job; the summary id doubles as the job identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub summary_id: String,
    pub region: String,
    pub bucket: String,
    pub key: String,
}

impl UploadJob {
    pub fn new(
        summary_id: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            summary_id: summary_id.into(),
            region: region.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_schema() {
        let job = UploadJob::new("s1", "eu-west-1", "bucket", "dir/file.csv");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "summaryId": "s1",
                "region": "eu-west-1",
                "bucket": "bucket",
                "key": "dir/file.csv",
            })
        );
    }
}
