//! Record classification
//!
//! Business rules live behind [`ClassificationPolicy`] so the pipeline never
//! hard-codes them.

use std::collections::HashSet;
use tally_common::types::{ExpenseRecord, ExpenseStatus};

use crate::config::IngestSettings;

/// Assigns a terminal status to one record
///
/// Implementations must be pure: the same record always yields the same
/// status, with no I/O, so records can be classified in any order.
pub trait ClassificationPolicy: Send + Sync {
    fn classify(&self, record: &ExpenseRecord) -> ExpenseStatus;
}

/// Exclusion list first, then amount and image checks
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    excluded_companies: HashSet<String>,
    sentinel_amounts: HashSet<String>,
}

impl DefaultPolicy {
    pub fn new(excluded_companies: HashSet<String>, sentinel_amounts: HashSet<String>) -> Self {
        Self {
            excluded_companies,
            sentinel_amounts,
        }
    }

    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self::new(
            settings.excluded_companies.clone(),
            settings.sentinel_amounts.clone(),
        )
    }

    fn amount_is_unusable(&self, amount: &str) -> bool {
        let amount = amount.trim();
        amount.is_empty()
            || self.sentinel_amounts.contains(amount)
            || amount.parse::<f64>().is_ok_and(|value| value == 0.0)
    }
}

impl ClassificationPolicy for DefaultPolicy {
    fn classify(&self, record: &ExpenseRecord) -> ExpenseStatus {
        if self.excluded_companies.contains(record.company_id.trim()) {
            return ExpenseStatus::Excluded;
        }

        if self.amount_is_unusable(&record.amount) || record.image.trim().is_empty() {
            return ExpenseStatus::Failed;
        }

        ExpenseStatus::Completed
    }
}

/// Set the status of every record in the chunk
pub fn classify_chunk(policy: &dyn ClassificationPolicy, chunk: &mut [ExpenseRecord]) {
    for record in chunk.iter_mut() {
        record.status = Some(policy.classify(record));
    }
}
