//! Postgres-backed durable store
//!
//! Tables come from the workspace `migrations/` directory: `expenses`,
//! `reports` and `upload_summaries`.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tally_common::types::{ExpenseRecord, MinifiedExpense, Report, ReportKey, UploadSummary};
use tracing::{debug, error, instrument, warn};

use super::RecordStore;
use crate::error::{IngestError, IngestResult};

/// Rows per INSERT, keeping bind parameters well under the Postgres limit
const INSERT_CHUNK_SIZE: usize = 5000;

const EXPENSE_COLUMNS: &str =
    "expense_id, company_id, report_id, company_name, amount, image, status";

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn expense_from_row(row: &PgRow) -> IngestResult<ExpenseRecord> {
    let status: String = row.try_get("status")?;
    Ok(ExpenseRecord {
        expense_id: row.try_get("expense_id")?,
        company_id: row.try_get("company_id")?,
        report_id: row.try_get("report_id")?,
        company_name: row.try_get("company_name")?,
        amount: row.try_get("amount")?,
        image: row.try_get("image")?,
        status: Some(status.parse()?),
    })
}

fn summary_from_row(row: &PgRow) -> IngestResult<UploadSummary> {
    let status: String = row.try_get("status")?;
    Ok(UploadSummary {
        summary_id: row.try_get("summary_id")?,
        total_completed: row.try_get("total_completed")?,
        total_excluded: row.try_get("total_excluded")?,
        total_failed: row.try_get("total_failed")?,
        failed_chunks: row.try_get("failed_chunks")?,
        total_reports: row.try_get("total_reports")?,
        status: status.parse()?,
    })
}

fn insert_statement(records: &[ExpenseRecord]) -> QueryBuilder<'_, Postgres> {
    let mut query_builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO expenses ({}) ", EXPENSE_COLUMNS));

    query_builder.push_values(records.iter(), |mut b, record| {
        b.push_bind(&record.expense_id)
            .push_bind(&record.company_id)
            .push_bind(&record.report_id)
            .push_bind(&record.company_name)
            .push_bind(&record.amount)
            .push_bind(&record.image)
            .push_bind(record.status.map(|s| s.as_str()));
    });
    query_builder.push(" ON CONFLICT (expense_id) DO NOTHING");
    query_builder
}

impl PgRecordStore {
    /// Insert each record on its own after a batch was rejected
    ///
    /// Rows Postgres refuses are logged and skipped. Fails only when no row
    /// of the batch could be written.
    async fn insert_row_by_row(&self, records: &[ExpenseRecord]) -> IngestResult<u64> {
        let mut inserted = 0;
        let mut rejected = Vec::new();

        for record in records {
            match insert_statement(std::slice::from_ref(record))
                .build()
                .execute(&self.pool)
                .await
            {
                Ok(result) => inserted += result.rows_affected(),
                Err(e) => {
                    let e = IngestError::RecordWrite(e.to_string());
                    warn!(expense_id = %record.expense_id, error = %e, "Expense rejected");
                    rejected.push(record.expense_id.as_str());
                }
            }
        }

        if !records.is_empty() && rejected.len() == records.len() {
            return Err(IngestError::RecordWrite(format!(
                "all {} expenses rejected",
                records.len()
            )));
        }
        if !rejected.is_empty() {
            error!(
                rejected = rejected.len(),
                expense_ids = %rejected.join(","),
                "Expenses not stored"
            );
        }
        Ok(inserted)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn insert_expenses(&self, records: &[ExpenseRecord]) -> IngestResult<u64> {
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            if let Some(unclassified) = chunk.iter().find(|r| r.status.is_none()) {
                return Err(IngestError::RecordWrite(format!(
                    "expense {} has no status",
                    unclassified.expense_id
                )));
            }

            inserted += match insert_statement(chunk).build().execute(&self.pool).await {
                Ok(result) => result.rows_affected(),
                Err(e) => {
                    warn!(rows = chunk.len(), error = %e, "Batch insert failed, retrying row by row");
                    self.insert_row_by_row(chunk).await?
                }
            };
        }

        debug!(
            inserted,
            skipped = (records.len() as u64).saturating_sub(inserted),
            "Expenses stored"
        );
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn find_expense(&self, expense_id: &str) -> IngestResult<Option<ExpenseRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM expenses WHERE expense_id = $1",
            EXPENSE_COLUMNS
        ))
        .bind(expense_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(expense_from_row).transpose()
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn find_completed_expenses(
        &self,
        keys: &[ReportKey],
    ) -> IngestResult<Vec<ExpenseRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let companies: Vec<String> = keys.iter().map(|k| k.company_id().to_string()).collect();
        let reports: Vec<String> = keys.iter().map(|k| k.report_id().to_string()).collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM expenses
            WHERE status = 'completed'
              AND (company_id, report_id) IN (
                  SELECT * FROM UNNEST($1::text[], $2::text[])
              )
            ORDER BY company_id, report_id, created_at, expense_id
            "#,
            EXPENSE_COLUMNS
        ))
        .bind(&companies)
        .bind(&reports)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(expense_from_row).collect()
    }

    #[instrument(skip(self, reports), fields(reports = reports.len()))]
    async fn save_reports(&self, reports: &[Report]) -> IngestResult<()> {
        for chunk in reports.chunks(INSERT_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO reports (company_id, report_id, company_name, expenses) ",
            );

            query_builder.push_values(chunk.iter(), |mut b, report| {
                b.push_bind(&report.company_id)
                    .push_bind(&report.report_id)
                    .push_bind(&report.company_name)
                    .push_bind(Json(&report.expenses));
            });
            query_builder.push(
                r#"
                ON CONFLICT (company_id, report_id) DO UPDATE SET
                    company_name = EXCLUDED.company_name,
                    expenses = EXCLUDED.expenses,
                    updated_at = NOW()
                "#,
            );

            query_builder.build().execute(&self.pool).await?;
        }

        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn find_report(&self, key: &ReportKey) -> IngestResult<Option<Report>> {
        let row = sqlx::query(
            r#"
            SELECT company_id, report_id, company_name, expenses
            FROM reports
            WHERE company_id = $1 AND report_id = $2
            "#,
        )
        .bind(key.company_id())
        .bind(key.report_id())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Json(expenses): Json<Vec<MinifiedExpense>> = row.try_get("expenses")?;
        Ok(Some(Report {
            company_id: row.try_get("company_id")?,
            report_id: row.try_get("report_id")?,
            company_name: row.try_get("company_name")?,
            expenses,
        }))
    }

    #[instrument(skip(self, summary), fields(summary_id = %summary.summary_id))]
    async fn upsert_summary(&self, summary: &UploadSummary) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_summaries (
                summary_id,
                total_completed,
                total_excluded,
                total_failed,
                failed_chunks,
                total_reports,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (summary_id) DO UPDATE SET
                total_completed = EXCLUDED.total_completed,
                total_excluded = EXCLUDED.total_excluded,
                total_failed = EXCLUDED.total_failed,
                failed_chunks = EXCLUDED.failed_chunks,
                total_reports = EXCLUDED.total_reports,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(&summary.summary_id)
        .bind(summary.total_completed)
        .bind(summary.total_excluded)
        .bind(summary.total_failed)
        .bind(summary.failed_chunks)
        .bind(summary.total_reports)
        .bind(summary.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>> {
        let row = sqlx::query(
            r#"
            SELECT summary_id, total_completed, total_excluded, total_failed,
                   failed_chunks, total_reports, status
            FROM upload_summaries
            WHERE summary_id = $1
            "#,
        )
        .bind(summary_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(summary_from_row).transpose()
    }
}
