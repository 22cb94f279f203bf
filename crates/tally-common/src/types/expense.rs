use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::report::ReportKey;
use crate::error::{Result, TallyError};

/// Terminal classification of a single expense line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Completed,
    Excluded,
    Failed,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Completed => "completed",
            ExpenseStatus::Excluded => "excluded",
            ExpenseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpenseStatus {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(ExpenseStatus::Completed),
            "excluded" => Ok(ExpenseStatus::Excluded),
            "failed" => Ok(ExpenseStatus::Failed),
            other => Err(TallyError::invalid_status("expense", other)),
        }
    }
}

/// One ingested expense line item
///
/// Created by the decoder from a CSV row, given a status exactly once by the
/// classifier, then written to the durable store and never updated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRecord {
    pub expense_id: String,
    #[serde(default)]
    pub company_id: String,
    #[serde(default)]
    pub report_id: String,
    #[serde(default)]
    pub company_name: String,
    /// Decimal amount kept as text, exactly as it appeared in the source
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExpenseStatus>,
}

impl ExpenseRecord {
    pub fn is_completed(&self) -> bool {
        self.status == Some(ExpenseStatus::Completed)
    }

    pub fn report_key(&self) -> Result<ReportKey> {
        ReportKey::new(&self.company_id, &self.report_id)
    }

    /// Project onto the fields a report document keeps
    pub fn minify(&self) -> MinifiedExpense {
        MinifiedExpense {
            expense_id: self.expense_id.clone(),
            amount: self.amount.clone(),
            image: self.image.clone(),
        }
    }
}

/// Expense as embedded in a report: company, report and status are implied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinifiedExpense {
    pub expense_id: String,
    pub amount: String,
    pub image: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record() -> ExpenseRecord {
        ExpenseRecord {
            expense_id: "e1".to_string(),
            company_id: "c1".to_string(),
            report_id: "r1".to_string(),
            company_name: "Acme".to_string(),
            amount: "10.00".to_string(),
            image: "img1".to_string(),
            status: None,
        }
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("completed".parse::<ExpenseStatus>().unwrap(), ExpenseStatus::Completed);
        assert_eq!("excluded".parse::<ExpenseStatus>().unwrap(), ExpenseStatus::Excluded);
        assert_eq!("failed".parse::<ExpenseStatus>().unwrap(), ExpenseStatus::Failed);
        assert!("Completed".parse::<ExpenseStatus>().is_err());
        assert!("".parse::<ExpenseStatus>().is_err());
    }

    #[test]
    fn test_minify_strips_report_fields() {
        let minified = record().minify();
        assert_eq!(minified.expense_id, "e1");
        assert_eq!(minified.amount, "10.00");
        assert_eq!(minified.image, "img1");

        let json = serde_json::to_value(&minified).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 3);
        assert!(json.get("companyId").is_none());
    }

    #[test]
    fn test_unclassified_record_omits_status() {
        let json = serde_json::to_value(record()).unwrap();
        assert!(json.get("status").is_none());
        assert_eq!(json["expenseId"], "e1");
    }

    #[test]
    fn test_is_completed() {
        let mut r = record();
        assert!(!r.is_completed());
        r.status = Some(ExpenseStatus::Failed);
        assert!(!r.is_completed());
        r.status = Some(ExpenseStatus::Completed);
        assert!(r.is_completed());
    }
}
