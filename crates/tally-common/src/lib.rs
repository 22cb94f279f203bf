//! Tally Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types, error handling, and logging for the Tally workspace.
//!
//! # Overview
//!
//! - **Types**: expense records, report keys, report documents, upload summaries
//!   and the queue payload that ties an upload to its source object
//! - **Error Handling**: [`TallyError`] for domain validation failures
//! - **Logging**: `tracing` subscriber bootstrap shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use tally_common::types::{ExpenseRecord, Report};
//!
//! fn build(records: &[ExpenseRecord]) -> Vec<Report> {
//!     Report::from_expenses(records.iter().filter(|r| r.is_completed()))
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TallyError};
