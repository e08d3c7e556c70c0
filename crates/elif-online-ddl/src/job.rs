//! Server-side online DDL jobs
//!
//! Vitess records every schema change submitted under a non-direct strategy
//! as a migration job, visible through `SHOW VITESS_MIGRATIONS`. Jobs are
//! owned by the server; this module only reads them and, for operators and
//! tests, issues the job control commands.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::connection::{quote_literal, ResultRow, SchemaConnection};
use crate::error::{OnlineDdlError, OnlineDdlResult};

/// Lifecycle state of a server-side DDL job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum JobStatus {
    Requested,
    Queued,
    Ready,
    Running,
    Complete,
    Failed,
    Cancelled,
    /// A status this crate does not know about; treated as non-terminal
    Other(String),
}

impl JobStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "requested" => JobStatus::Requested,
            "queued" => JobStatus::Queued,
            "ready" => JobStatus::Ready,
            "running" => JobStatus::Running,
            "complete" => JobStatus::Complete,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            other => JobStatus::Other(other.to_string()),
        }
    }

    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Requested => "requested",
            JobStatus::Queued => "queued",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Other(status) => status,
        }
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        JobStatus::parse(&value)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `SHOW VITESS_MIGRATIONS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub uuid: String,
    pub correlation_tag: String,
    pub statement: String,
    pub status: JobStatus,
    pub is_immediate_operation: bool,
    pub message: Option<String>,
    pub added_at: Option<NaiveDateTime>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub progress: f64,
    pub eta_seconds: i64,
    pub retries: u32,
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl JobRecord {
    /// Decode a `SHOW VITESS_MIGRATIONS` row
    pub fn from_row(row: &ResultRow) -> OnlineDdlResult<Self> {
        let uuid = required(row, "migration_uuid")?;
        // Older servers omit the numeric id; the uuid identifies the job just as well.
        let id = row
            .get("id")
            .map(str::to_string)
            .unwrap_or_else(|| uuid.clone());

        Ok(JobRecord {
            id,
            uuid,
            correlation_tag: row.get("migration_context").unwrap_or_default().to_string(),
            statement: row.get("migration_statement").unwrap_or_default().to_string(),
            status: JobStatus::parse(&required(row, "migration_status")?),
            is_immediate_operation: parse_flag(row, "is_immediate_operation")?,
            message: row
                .get("message")
                .filter(|message| !message.is_empty())
                .map(str::to_string),
            added_at: parse_timestamp(row, "added_timestamp")?,
            started_at: parse_timestamp(row, "started_timestamp")?,
            completed_at: parse_timestamp(row, "completed_timestamp")?,
            cancelled_at: parse_timestamp(row, "cancelled_timestamp")?,
            progress: parse_number(row, "progress")?.unwrap_or(0.0),
            eta_seconds: parse_number(row, "eta_seconds")?.unwrap_or(-1),
            retries: parse_number(row, "retries")?.unwrap_or(0),
        })
    }

    /// Status line fields, `column: value` pairs joined by ` | `
    pub fn detail_message(&self) -> String {
        let details = [
            ("migration_uuid", self.uuid.clone()),
            ("migration_statement", self.statement.clone()),
            ("added_timestamp", display_timestamp(self.added_at)),
            ("started_timestamp", display_timestamp(self.started_at)),
            (
                "is_immediate_operation",
                u8::from(self.is_immediate_operation).to_string(),
            ),
            ("progress", self.progress.to_string()),
            ("eta_seconds", self.eta_seconds.to_string()),
            ("retries", self.retries.to_string()),
        ];

        details
            .iter()
            .map(|(column, value)| format!("{}: {}", column, value))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Status query for every job tagged with `correlation_tag`
pub fn status_query(correlation_tag: &str) -> String {
    format!("SHOW VITESS_MIGRATIONS LIKE {}", quote_literal(correlation_tag))
}

/// Fetch every job tagged with `correlation_tag`
pub async fn fetch_jobs(
    conn: &mut dyn SchemaConnection,
    correlation_tag: &str,
) -> OnlineDdlResult<Vec<JobRecord>> {
    let rows = conn.fetch_all(&status_query(correlation_tag)).await?;
    rows.iter().map(JobRecord::from_row).collect()
}

/// Job control commands understood by `ALTER VITESS_MIGRATION`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    Cancel,
    Complete,
    Retry,
}

impl JobCommand {
    fn keyword(&self) -> &'static str {
        match self {
            JobCommand::Cancel => "CANCEL",
            JobCommand::Complete => "COMPLETE",
            JobCommand::Retry => "RETRY",
        }
    }

    pub fn to_sql(&self, uuid: &str) -> String {
        format!("ALTER VITESS_MIGRATION {} {}", quote_literal(uuid), self.keyword())
    }
}

pub async fn cancel_job(conn: &mut dyn SchemaConnection, uuid: &str) -> OnlineDdlResult<()> {
    conn.execute(&JobCommand::Cancel.to_sql(uuid)).await?;
    Ok(())
}

/// Force completion of a job submitted with `--postpone-completion`
pub async fn complete_job(conn: &mut dyn SchemaConnection, uuid: &str) -> OnlineDdlResult<()> {
    conn.execute(&JobCommand::Complete.to_sql(uuid)).await?;
    Ok(())
}

pub async fn retry_job(conn: &mut dyn SchemaConnection, uuid: &str) -> OnlineDdlResult<()> {
    conn.execute(&JobCommand::Retry.to_sql(uuid)).await?;
    Ok(())
}

fn required(row: &ResultRow, column: &str) -> OnlineDdlResult<String> {
    row.get(column)
        .map(str::to_string)
        .ok_or_else(|| OnlineDdlError::Decode {
            column: column.to_string(),
            message: "missing value".to_string(),
        })
}

fn parse_flag(row: &ResultRow, column: &str) -> OnlineDdlResult<bool> {
    match row.get(column).map(str::trim) {
        None | Some("") | Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(OnlineDdlError::Decode {
            column: column.to_string(),
            message: format!("expected 0 or 1, got '{}'", other),
        }),
    }
}

fn parse_number<T>(row: &ResultRow, column: &str) -> OnlineDdlResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match row.get(column).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| OnlineDdlError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_timestamp(row: &ResultRow, column: &str) -> OnlineDdlResult<Option<NaiveDateTime>> {
    match row.get(column).map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .map(Some)
            .map_err(|e| OnlineDdlError::Decode {
                column: column.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
    }
}

fn display_timestamp(timestamp: Option<NaiveDateTime>) -> String {
    timestamp
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}
