use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TallyError};

/// Lifecycle of an upload job
///
/// Variants are declared in lifecycle order; [`SummaryStatus::advance`] never
/// moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    #[default]
    Queued,
    Processing,
    Completed,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Queued => "queued",
            SummaryStatus::Processing => "processing",
            SummaryStatus::Completed => "completed",
        }
    }

    /// Move towards `next`, ignoring requests to go backwards
    pub fn advance(self, next: SummaryStatus) -> SummaryStatus {
        self.max(next)
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryStatus {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(SummaryStatus::Queued),
            "processing" => Ok(SummaryStatus::Processing),
            "completed" => Ok(SummaryStatus::Completed),
            other => Err(TallyError::invalid_status("summary", other)),
        }
    }
}

/// Progress and result of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub summary_id: String,
    pub total_completed: i64,
    pub total_excluded: i64,
    pub total_failed: i64,
    /// Chunks whose processing failed; their records may be missing
    #[serde(default)]
    pub failed_chunks: i64,
    /// Cardinality of the report-key set, derived when the summary is read
    #[serde(default)]
    pub total_reports: i64,
    pub status: SummaryStatus,
}

impl UploadSummary {
    pub fn new(summary_id: impl Into<String>) -> Self {
        Self {
            summary_id: summary_id.into(),
            total_completed: 0,
            total_excluded: 0,
            total_failed: 0,
            failed_chunks: 0,
            total_reports: 0,
            status: SummaryStatus::Queued,
        }
    }

    pub fn total_records(&self) -> i64 {
        self.total_completed + self.total_excluded + self.total_failed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        use SummaryStatus::*;
        assert_eq!(Queued.advance(Processing), Processing);
        assert_eq!(Processing.advance(Completed), Completed);
        assert_eq!(Completed.advance(Processing), Completed);
        assert_eq!(Processing.advance(Queued), Processing);
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert_eq!("processing".parse::<SummaryStatus>().unwrap(), SummaryStatus::Processing);
        assert!("failed".parse::<SummaryStatus>().is_err());
        assert!("done".parse::<SummaryStatus>().is_err());
    }

    #[test]
    fn test_new_summary() {
        let summary = UploadSummary::new("s1");
        assert_eq!(summary.status, SummaryStatus::Queued);
        assert_eq!(summary.total_records(), 0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["summaryId"], "s1");
        assert_eq!(json["status"], "queued");
    }
}
