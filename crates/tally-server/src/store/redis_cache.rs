//! Redis-backed cache store
//!
//! Key layout:
//!
//! | Key | Type | Content |
//! |---|---|---|
//! | `summary_<summaryId>` | hash | summary fields (`totalCompleted`, `status`, ...) |
//! | `summary_reports_<summaryId>` | set | `companyId/reportId` strings |
//! | `report_<companyId>/<reportId>` | string | working report JSON |

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tally_common::types::{Report, ReportKey, SummaryStatus, UploadSummary};
use tracing::{debug, instrument, warn};

use super::{CacheStore, ProgressDelta};
use crate::error::IngestResult;

const FAILED_CHUNKS_FIELD: &str = "failedChunks";
const STATUS_FIELD: &str = "status";

/// Create the working report, or merge new expenses into it by id
const UPSERT_REPORT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  redis.call('SET', KEYS[1], ARGV[1])
  return 1
end
local doc = cjson.decode(current)
local incoming = cjson.decode(ARGV[1])
if type(doc.expenses) ~= 'table' then doc.expenses = {} end
local seen = {}
for _, e in ipairs(doc.expenses) do seen[e.expenseId] = true end
for _, e in ipairs(incoming.expenses) do
  if not seen[e.expenseId] then
    table.insert(doc.expenses, e)
    seen[e.expenseId] = true
  end
end
redis.call('SET', KEYS[1], cjson.encode(doc))
return 0
"#;

/// Move the status forward to ARGV[1] unless it is already at or past it
const ADVANCE_STATUS_SCRIPT: &str = r#"
local rank = { queued = 0, processing = 1, completed = 2 }
local current = redis.call('HGET', KEYS[1], 'status')
if current and rank[current] and rank[current] >= rank[ARGV[1]] then
  return 0
end
redis.call('HSET', KEYS[1], 'status', ARGV[1])
return 1
"#;

pub fn summary_key(summary_id: &str) -> String {
    format!("summary_{}", summary_id)
}

pub fn summary_reports_key(summary_id: &str) -> String {
    format!("summary_reports_{}", summary_id)
}

pub fn report_key(key: &ReportKey) -> String {
    format!("report_{}", key)
}

pub struct RedisCache {
    conn: ConnectionManager,
    upsert_report: Script,
    advance_status: Script,
}

impl RedisCache {
    pub async fn connect(url: &str) -> IngestResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            upsert_report: Script::new(UPSERT_REPORT_SCRIPT),
            advance_status: Script::new(ADVANCE_STATUS_SCRIPT),
        })
    }

    async fn advance_status(&self, summary_id: &str, status: SummaryStatus) -> IngestResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .advance_status
            .key(summary_key(summary_id))
            .arg(status.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Rebuild a summary from its hash fields
///
/// Missing counters read as zero; a missing status reads as `queued`.
fn summary_from_fields(
    summary_id: &str,
    fields: &HashMap<String, String>,
    total_reports: i64,
) -> IngestResult<UploadSummary> {
    let count = |name: &str| {
        fields
            .get(name)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
    };

    let status = match fields.get(STATUS_FIELD) {
        Some(raw) => raw.parse::<SummaryStatus>()?,
        None => SummaryStatus::Queued,
    };

    Ok(UploadSummary {
        summary_id: summary_id.to_string(),
        total_completed: count("totalCompleted"),
        total_excluded: count("totalExcluded"),
        total_failed: count("totalFailed"),
        failed_chunks: count(FAILED_CHUNKS_FIELD),
        total_reports,
        status,
    })
}

#[async_trait]
impl CacheStore for RedisCache {
    #[instrument(skip(self))]
    async fn init_summary(&self, summary_id: &str) -> IngestResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(
                summary_key(summary_id),
                &[
                    ("summaryId", summary_id),
                    ("totalCompleted", "0"),
                    ("totalExcluded", "0"),
                    ("totalFailed", "0"),
                    (FAILED_CHUNKS_FIELD, "0"),
                    (STATUS_FIELD, SummaryStatus::Queued.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn discard_summary(&self, summary_id: &str) -> IngestResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(vec![summary_key(summary_id), summary_reports_key(summary_id)])
            .await?;
        Ok(())
    }

    #[instrument(skip(self, report), fields(company_id = %report.company_id, report_id = %report.report_id))]
    async fn upsert_working_report(&self, report: &Report) -> IngestResult<()> {
        let key = report.key()?;
        let document = serde_json::to_string(report)?;

        let mut conn = self.conn.clone();
        let created: i64 = self
            .upsert_report
            .key(report_key(&key))
            .arg(document)
            .invoke_async(&mut conn)
            .await?;

        debug!(created = created == 1, expenses = report.expenses.len(), "Working report updated");
        Ok(())
    }

    #[instrument(skip(self, delta), fields(records = delta.records()))]
    async fn record_progress(&self, summary_id: &str, delta: &ProgressDelta) -> IngestResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        if !delta.report_keys.is_empty() {
            let members: Vec<String> = delta.report_keys.iter().map(ToString::to_string).collect();
            pipe.sadd(summary_reports_key(summary_id), members).ignore();
        }
        for (field, n) in delta.increments() {
            pipe.hincr(summary_key(summary_id), field, n).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        self.advance_status(summary_id, SummaryStatus::Processing).await
    }

    #[instrument(skip(self))]
    async fn record_chunk_failure(&self, summary_id: &str) -> IngestResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hincr(summary_key(summary_id), FAILED_CHUNKS_FIELD, 1)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>> {
        let mut conn = self.conn.clone();
        let (fields, total_reports): (HashMap<String, String>, i64) = redis::pipe()
            .hgetall(summary_key(summary_id))
            .scard(summary_reports_key(summary_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        summary_from_fields(summary_id, &fields, total_reports).map(Some)
    }

    #[instrument(skip(self))]
    async fn report_keys(&self, summary_id: &str) -> IngestResult<Vec<ReportKey>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(summary_reports_key(summary_id)).await?;

        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<ReportKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(member = %member, error = %e, "Skipping malformed report key");
                    None
                }
            })
            .collect())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn working_report(&self, key: &ReportKey) -> IngestResult<Option<Report>> {
        let mut conn = self.conn.clone();
        let document: Option<String> = conn.get(report_key(key)).await?;

        match document {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn complete_summary(&self, summary_id: &str, retention: Duration) -> IngestResult<()> {
        let seconds = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX).max(1);

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(summary_key(summary_id), STATUS_FIELD, SummaryStatus::Completed.as_str())
            .ignore()
            .expire(summary_key(summary_id), seconds)
            .ignore()
            .expire(summary_reports_key(summary_id), seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(retention_secs = seconds, "Summary progress keys set to expire");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let key = ReportKey::new("c1", "r1").unwrap();
        assert_eq!(summary_key("s1"), "summary_s1");
        assert_eq!(summary_reports_key("s1"), "summary_reports_s1");
        assert_eq!(report_key(&key), "report_c1/r1");
    }

    #[test]
    fn test_summary_from_fields() {
        let fields: HashMap<String, String> = [
            ("summaryId", "s1"),
            ("totalCompleted", "4"),
            ("totalFailed", "2"),
            ("status", "processing"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let summary = summary_from_fields("s1", &fields, 3).unwrap();
        assert_eq!(summary.total_completed, 4);
        assert_eq!(summary.total_excluded, 0);
        assert_eq!(summary.total_failed, 2);
        assert_eq!(summary.total_reports, 3);
        assert_eq!(summary.status, SummaryStatus::Processing);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let fields: HashMap<String, String> =
            [("status".to_string(), "exploded".to_string())].into_iter().collect();
        assert!(summary_from_fields("s1", &fields, 0).is_err());
    }
}
