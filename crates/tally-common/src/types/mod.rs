//! Shared domain types
//!
//! These types cross crate boundaries: the decoder produces [`ExpenseRecord`]s,
//! the stores persist them, and the API serializes them back out. Field names
//! serialize in camelCase, matching the CSV header and the cache documents.

mod expense;
mod job;
mod report;
mod summary;

pub use expense::{ExpenseRecord, ExpenseStatus, MinifiedExpense};
pub use job::UploadJob;
pub use report::{Report, ReportKey, REPORT_KEY_SEPARATOR};
pub use summary::{SummaryStatus, UploadSummary};
