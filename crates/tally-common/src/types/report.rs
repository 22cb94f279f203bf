use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::expense::{ExpenseRecord, MinifiedExpense};
use crate::error::{Result, TallyError};

/// Separator between company and report id in the textual key form
pub const REPORT_KEY_SEPARATOR: char = '/';

/// Composite `(companyId, reportId)` identifying one aggregate report
///
/// Neither component may be empty or contain [`REPORT_KEY_SEPARATOR`], so the
/// textual form `company/report` round-trips without loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportKey {
    company_id: String,
    report_id: String,
}

impl ReportKey {
    pub fn new(company_id: impl Into<String>, report_id: impl Into<String>) -> Result<Self> {
        let company_id = company_id.into();
        let report_id = report_id.into();

        let valid = |part: &str| !part.is_empty() && !part.contains(REPORT_KEY_SEPARATOR);
        if !valid(&company_id) || !valid(&report_id) {
            return Err(TallyError::InvalidReportKey(format!(
                "{}{}{}",
                company_id, REPORT_KEY_SEPARATOR, report_id
            )));
        }

        Ok(Self {
            company_id,
            report_id,
        })
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.company_id, REPORT_KEY_SEPARATOR, self.report_id)
    }
}

impl FromStr for ReportKey {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        let (company_id, report_id) = s
            .split_once(REPORT_KEY_SEPARATOR)
            .ok_or_else(|| TallyError::InvalidReportKey(s.to_string()))?;
        Self::new(company_id, report_id)
    }
}

/// Aggregate view over the completed expenses sharing one [`ReportKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub company_id: String,
    pub report_id: String,
    pub company_name: String,
    pub expenses: Vec<MinifiedExpense>,
}

impl Report {
    pub fn key(&self) -> Result<ReportKey> {
        ReportKey::new(&self.company_id, &self.report_id)
    }

    /// Group expenses into one report per key
    ///
    /// Callers pass only the records that belong in reports (normally the
    /// completed ones). Records without a valid key are skipped with a warning,
    /// and an expense id seen twice for the same key is kept once. Output is
    /// ordered by key.
    pub fn from_expenses<'a, I>(records: I) -> Vec<Report>
    where
        I: IntoIterator<Item = &'a ExpenseRecord>,
    {
        let mut reports: BTreeMap<ReportKey, Report> = BTreeMap::new();
        let mut seen: HashSet<(ReportKey, &'a str)> = HashSet::new();

        for record in records {
            let key = match record.report_key() {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(
                        expense_id = %record.expense_id,
                        error = %e,
                        "Expense cannot be assigned to a report"
                    );
                    continue;
                }
            };

            if !seen.insert((key.clone(), record.expense_id.as_str())) {
                continue;
            }

            reports
                .entry(key)
                .or_insert_with(|| Report {
                    company_id: record.company_id.clone(),
                    report_id: record.report_id.clone(),
                    company_name: record.company_name.clone(),
                    expenses: Vec::new(),
                })
                .expenses
                .push(record.minify());
        }

        reports.into_values().collect()
    }

    /// Append expenses not already present, by expense id
    pub fn extend_unique(&mut self, expenses: impl IntoIterator<Item = MinifiedExpense>) {
        let mut seen: HashSet<String> =
            self.expenses.iter().map(|e| e.expense_id.clone()).collect();
        for expense in expenses {
            if seen.insert(expense.expense_id.clone()) {
                self.expenses.push(expense);
            }
        }
    }
}
