//! In-memory Vitess emulation for tests
//!
//! [`FakeVitess`] answers the handful of statements online DDL tracking sends
//! to vtgate. DDL submitted under a non-direct strategy becomes a job tagged
//! with the session's `@@migration_context`; each job advances one lifecycle
//! step every time its tag is polled with `SHOW VITESS_MIGRATIONS`.
//!
//! Handles are cheap clones over shared state, so a test can hand one clone
//! to the code under test and inspect (or cancel jobs through) another.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::connection::{ResultRow, SchemaConnection};
use crate::error::{OnlineDdlError, OnlineDdlResult};
use crate::job::{JobRecord, JobStatus};
use crate::strategy::DdlStrategy;

static SET_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^SET\s+@@(\w+)\s*=\s*'((?:[^']|'')*)'$").expect("valid regex"));
static SHOW_MIGRATIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^SHOW\s+VITESS_MIGRATIONS\s+LIKE\s+'((?:[^']|'')*)'$").expect("valid regex"));
static ALTER_MIGRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^ALTER\s+VITESS_MIGRATION\s+'((?:[^']|'')*)'\s+(CANCEL|COMPLETE|RETRY)$")
        .expect("valid regex")
});
static TABLE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(CREATE|DROP|ALTER)\s+TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?`?(\w+)`?")
        .expect("valid regex")
});

pub const VITESS_VERSION: &str = "8.0.31-Vitess";
pub const MYSQL_VERSION: &str = "8.0.36";

/// What happens to the next submitted job
#[derive(Debug, Clone)]
enum JobScript {
    Fail(String),
    Stall,
}

#[derive(Debug)]
struct FakeJob {
    record: JobRecord,
    steps: VecDeque<JobStatus>,
    failure: Option<String>,
    table_effect: Option<TableEffect>,
}

#[derive(Debug, Clone)]
enum TableEffect {
    Create(String),
    Drop(String),
}

#[derive(Debug)]
struct FakeState {
    version: String,
    ddl_strategy: String,
    migration_context: String,
    jobs: Vec<FakeJob>,
    next_id: u64,
    scripts: VecDeque<JobScript>,
    executed: Vec<String>,
    status_polls: usize,
    failing_status_queries: usize,
    failing_statements: Vec<(String, String)>,
    tables: BTreeSet<String>,
}

impl FakeState {
    fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ddl_strategy: "direct".to_string(),
            migration_context: String::new(),
            jobs: Vec::new(),
            next_id: 1,
            scripts: VecDeque::new(),
            executed: Vec::new(),
            status_polls: 0,
            failing_status_queries: 0,
            failing_statements: Vec::new(),
            tables: BTreeSet::new(),
        }
    }

    fn is_vitess(&self) -> bool {
        self.version.contains("Vitess")
    }

    fn submit_ddl(&mut self, sql: &str) -> OnlineDdlResult<u64> {
        let effect = TABLE_STATEMENT.captures(sql).and_then(|caps| {
            let table = caps[2].to_string();
            match caps[1].to_ascii_uppercase().as_str() {
                "CREATE" => Some(TableEffect::Create(table)),
                "DROP" => Some(TableEffect::Drop(table)),
                _ => None,
            }
        });

        let tracked = self.is_vitess() && DdlStrategy::new(self.ddl_strategy.as_str()).is_tracked();
        if !tracked {
            if let Some(effect) = effect {
                self.apply(&effect);
            }
            return Ok(0);
        }

        let is_immediate = effect.is_some();
        let now = now();
        let record = JobRecord {
            id: self.next_id.to_string(),
            uuid: Uuid::new_v4().to_string().replace('-', "_"),
            correlation_tag: self.migration_context.clone(),
            statement: sql.to_string(),
            status: JobStatus::Queued,
            is_immediate_operation: is_immediate,
            message: None,
            added_at: Some(now),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            progress: 0.0,
            eta_seconds: -1,
            retries: 0,
        };
        self.next_id += 1;

        let (steps, failure) = match self.scripts.pop_front() {
            Some(JobScript::Fail(message)) => {
                (VecDeque::from([JobStatus::Running, JobStatus::Failed]), Some(message))
            }
            Some(JobScript::Stall) => (VecDeque::from([JobStatus::Running]), None),
            None if is_immediate => (VecDeque::from([JobStatus::Complete]), None),
            None => (VecDeque::from([JobStatus::Running, JobStatus::Complete]), None),
        };

        self.jobs.push(FakeJob {
            record,
            steps,
            failure,
            table_effect: effect,
        });
        Ok(0)
    }

    fn apply(&mut self, effect: &TableEffect) {
        match effect {
            TableEffect::Create(table) => {
                self.tables.insert(table.clone());
            }
            TableEffect::Drop(table) => {
                self.tables.remove(table);
            }
        }
    }

    fn advance(&mut self, tag: &str) {
        let mut effects = Vec::new();
        for job in self.jobs.iter_mut().filter(|job| job.record.correlation_tag == tag) {
            if job.record.status.is_terminal() {
                continue;
            }
            let Some(next) = job.steps.pop_front() else {
                continue;
            };
            transition(job, next);
            if job.record.status == JobStatus::Complete {
                if let Some(effect) = job.table_effect.clone() {
                    effects.push(effect);
                }
            }
        }
        for effect in effects {
            self.apply(&effect);
        }
    }

    fn control(&mut self, uuid: &str, command: &str) -> OnlineDdlResult<u64> {
        let job = self
            .jobs
            .iter_mut()
            .find(|job| job.record.uuid == uuid)
            .ok_or_else(|| OnlineDdlError::Database(format!("unknown migration: {}", uuid)))?;

        let command = command.to_ascii_uppercase();
        if command == "RETRY" {
            if !matches!(job.record.status, JobStatus::Failed | JobStatus::Cancelled) {
                return Ok(0);
            }
            job.record.retries += 1;
            job.record.message = None;
            job.record.completed_at = None;
            job.record.cancelled_at = None;
            job.record.progress = 0.0;
            job.failure = None;
            job.steps = VecDeque::from([JobStatus::Running, JobStatus::Complete]);
            transition(job, JobStatus::Queued);
            return Ok(1);
        }

        if job.record.status.is_terminal() {
            return Ok(0);
        }

        match command.as_str() {
            "CANCEL" => {
                job.steps.clear();
                transition(job, JobStatus::Cancelled);
                Ok(1)
            }
            "COMPLETE" => {
                job.steps = VecDeque::from([JobStatus::Complete]);
                Ok(1)
            }
            other => Err(OnlineDdlError::Database(format!(
                "ALTER VITESS_MIGRATION ... {} is not emulated",
                other
            ))),
        }
    }
}

fn transition(job: &mut FakeJob, status: JobStatus) {
    let now = now();
    match status {
        JobStatus::Running => {
            job.record.started_at = Some(now);
            job.record.progress = 50.0;
        }
        JobStatus::Complete => {
            job.record.started_at.get_or_insert(now);
            job.record.completed_at = Some(now);
            job.record.progress = 100.0;
            job.record.eta_seconds = 0;
        }
        JobStatus::Failed => {
            job.record.completed_at = Some(now);
            job.record.message = job.failure.clone();
        }
        JobStatus::Cancelled => {
            job.record.cancelled_at = Some(now);
            job.record.message = Some("CANCEL issued by user".to_string());
        }
        _ => {}
    }
    job.record.status = status;
}

fn now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

fn unescape(value: &str) -> String {
    value.replace("''", "'").replace("\\\\", "\\")
}

fn job_row(record: &JobRecord) -> ResultRow {
    let ts = |value: Option<NaiveDateTime>| value.map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string());
    ResultRow::new()
        .with("id", Some(record.id.clone()))
        .with("migration_uuid", Some(record.uuid.clone()))
        .with("migration_context", Some(record.correlation_tag.clone()))
        .with("migration_statement", Some(record.statement.clone()))
        .with("added_timestamp", ts(record.added_at))
        .with("started_timestamp", ts(record.started_at))
        .with("completed_timestamp", ts(record.completed_at))
        .with("cancelled_timestamp", ts(record.cancelled_at))
        .with(
            "is_immediate_operation",
            Some(if record.is_immediate_operation { "1" } else { "0" }),
        )
        .with("progress", Some(record.progress.to_string()))
        .with("eta_seconds", Some(record.eta_seconds.to_string()))
        .with("retries", Some(record.retries.to_string()))
        .with("migration_status", Some(record.status.to_string()))
        .with("message", record.message.clone())
}

/// Fake vtgate connection
#[derive(Debug, Clone)]
pub struct FakeVitess {
    state: Arc<Mutex<FakeState>>,
}

impl FakeVitess {
    /// A Vitess server with `@@ddl_strategy` initially `direct`
    pub fn new() -> Self {
        Self::with_version(VITESS_VERSION)
    }

    /// A plain MySQL server without online DDL support
    pub fn mysql() -> Self {
        Self::with_version(MYSQL_VERSION)
    }

    pub fn with_version(version: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::new(version))),
        }
    }

    /// Make the next submitted job fail with `message`
    pub fn fail_next_job(&self, message: impl Into<String>) -> &Self {
        self.state.lock().scripts.push_back(JobScript::Fail(message.into()));
        self
    }

    /// Keep the next submitted job running until it is cancelled or completed
    pub fn stall_next_job(&self) -> &Self {
        self.state.lock().scripts.push_back(JobScript::Stall);
        self
    }

    /// Fail the next `count` status queries
    pub fn fail_status_queries(&self, count: usize) -> &Self {
        self.state.lock().failing_status_queries = count;
        self
    }

    /// Fail every statement containing `pattern`
    pub fn fail_statements_matching(&self, pattern: &str, message: &str) -> &Self {
        self.state
            .lock()
            .failing_statements
            .push((pattern.to_string(), message.to_string()));
        self
    }

    pub fn set_ddl_strategy(&self, strategy: &str) {
        self.state.lock().ddl_strategy = strategy.to_string();
    }

    pub fn ddl_strategy(&self) -> String {
        self.state.lock().ddl_strategy.clone()
    }

    pub fn migration_context(&self) -> String {
        self.state.lock().migration_context.clone()
    }

    /// Jobs tagged with `tag`, in submission order
    pub fn jobs_for(&self, tag: &str) -> Vec<JobRecord> {
        self.state
            .lock()
            .jobs
            .iter()
            .filter(|job| job.record.correlation_tag == tag)
            .map(|job| job.record.clone())
            .collect()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        self.state.lock().jobs.iter().map(|job| job.record.clone()).collect()
    }

    /// Cancel a job the way an operator would
    pub fn cancel(&self, uuid: &str) -> OnlineDdlResult<()> {
        self.state.lock().control(uuid, "CANCEL").map(|_| ())
    }

    /// Every statement passed to `execute`, in order
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// `SET` statements targeting `@@ddl_strategy`, in order
    pub fn strategy_writes(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter_map(|sql| {
                SET_VARIABLE.captures(&sql).and_then(|caps| {
                    caps[1]
                        .eq_ignore_ascii_case("ddl_strategy")
                        .then(|| unescape(&caps[2]))
                })
            })
            .collect()
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().status_polls
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains(table)
    }
}

impl Default for FakeVitess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaConnection for FakeVitess {
    async fn execute(&mut self, sql: &str) -> OnlineDdlResult<u64> {
        let sql = sql.trim();
        let mut state = self.state.lock();
        state.executed.push(sql.to_string());

        if let Some((_, message)) = state
            .failing_statements
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(OnlineDdlError::Database(message.clone()));
        }

        if let Some(caps) = SET_VARIABLE.captures(sql) {
            if !state.is_vitess() {
                return Err(OnlineDdlError::Database(format!(
                    "Unknown system variable '{}'",
                    &caps[1]
                )));
            }
            let value = unescape(&caps[2]);
            match caps[1].to_ascii_lowercase().as_str() {
                "ddl_strategy" => state.ddl_strategy = value,
                "migration_context" => state.migration_context = value,
                other => {
                    return Err(OnlineDdlError::Database(format!(
                        "Unknown system variable '{}'",
                        other
                    )))
                }
            }
            return Ok(0);
        }

        if let Some(caps) = ALTER_MIGRATION.captures(sql) {
            let uuid = unescape(&caps[1]);
            return state.control(&uuid, &caps[2]);
        }

        let keyword = sql
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match keyword.as_str() {
            "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE" => state.submit_ddl(sql),
            _ => Ok(0),
        }
    }

    async fn fetch_all(&mut self, sql: &str) -> OnlineDdlResult<Vec<ResultRow>> {
        let sql = sql.trim();
        let mut state = self.state.lock();

        if sql.eq_ignore_ascii_case("SELECT VERSION()") {
            return Ok(vec![ResultRow::new().with("VERSION()", Some(state.version.clone()))]);
        }

        if sql.eq_ignore_ascii_case("SELECT @@ddl_strategy") {
            if !state.is_vitess() {
                return Err(OnlineDdlError::Database(
                    "Unknown system variable 'ddl_strategy'".to_string(),
                ));
            }
            return Ok(vec![
                ResultRow::new().with("@@ddl_strategy", Some(state.ddl_strategy.clone()))
            ]);
        }

        if let Some(caps) = SHOW_MIGRATIONS.captures(sql) {
            state.status_polls += 1;
            if state.failing_status_queries > 0 {
                state.failing_status_queries -= 1;
                return Err(OnlineDdlError::Query(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "Lost connection to MySQL server during query",
                ))));
            }
            if !state.is_vitess() {
                return Err(OnlineDdlError::Database(
                    "You have an error in your SQL syntax near 'VITESS_MIGRATIONS'".to_string(),
                ));
            }

            let tag = unescape(&caps[1]);
            state.advance(&tag);
            return Ok(state
                .jobs
                .iter()
                .filter(|job| job.record.correlation_tag == tag)
                .map(|job| job_row(&job.record))
                .collect());
        }

        Err(OnlineDdlError::Database(format!(
            "FakeVitess cannot answer query: {}",
            sql
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{cancel_job, fetch_jobs, retry_job};

    #[tokio::test]
    async fn test_direct_ddl_creates_no_jobs() {
        let mut conn = FakeVitess::new();
        conn.execute("CREATE TABLE users (id bigint)").await.unwrap();

        assert!(conn.jobs().is_empty());
        assert!(conn.has_table("users"));
    }

    #[tokio::test]
    async fn test_tracked_ddl_advances_per_poll() {
        let mut conn = FakeVitess::new();
        conn.execute("SET @@ddl_strategy='vitess'").await.unwrap();
        conn.execute("SET @@migration_context='1_t'").await.unwrap();
        conn.execute("ALTER TABLE users ADD COLUMN name varchar(255)").await.unwrap();

        let jobs = fetch_jobs(&mut conn, "1_t").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Running);
        assert!(!jobs[0].is_immediate_operation);

        let jobs = fetch_jobs(&mut conn, "1_t").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert!(jobs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_through_sql() {
        let mut conn = FakeVitess::new();
        conn.stall_next_job();
        conn.execute("SET @@ddl_strategy='vitess'").await.unwrap();
        conn.execute("SET @@migration_context='1_t'").await.unwrap();
        conn.execute("ALTER TABLE users ADD COLUMN name varchar(255)").await.unwrap();

        let uuid = conn.jobs_for("1_t")[0].uuid.clone();
        cancel_job(&mut conn, &uuid).await.unwrap();

        let jobs = fetch_jobs(&mut conn, "1_t").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Cancelled);
        assert_eq!(jobs[0].message.as_deref(), Some("CANCEL issued by user"));
    }

    #[tokio::test]
    async fn test_mysql_rejects_vitess_variables() {
        let mut conn = FakeVitess::mysql();
        assert!(conn.execute("SET @@ddl_strategy='vitess'").await.is_err());
        assert_eq!(
            conn.fetch_scalar("SELECT VERSION()").await.unwrap().as_deref(),
            Some(MYSQL_VERSION)
        );
    }

    #[tokio::test]
    async fn test_retry_requeues_failed_job() {
        let mut conn = FakeVitess::new();
        conn.fail_next_job("lock wait timeout");
        conn.execute("SET @@ddl_strategy='vitess'").await.unwrap();
        conn.execute("SET @@migration_context='1_t'").await.unwrap();
        conn.execute("ALTER TABLE users ADD COLUMN name varchar(255)").await.unwrap();
        fetch_jobs(&mut conn, "1_t").await.unwrap();
        let jobs = fetch_jobs(&mut conn, "1_t").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);

        retry_job(&mut conn, &jobs[0].uuid).await.unwrap();

        let job = &conn.jobs_for("1_t")[0];
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retries, 1);
        assert_eq!(job.message, None);

        fetch_jobs(&mut conn, "1_t").await.unwrap();
        let jobs = fetch_jobs(&mut conn, "1_t").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_retry_ignores_running_job() {
        let mut conn = FakeVitess::new();
        conn.stall_next_job();
        conn.execute("SET @@ddl_strategy='vitess'").await.unwrap();
        conn.execute("SET @@migration_context='1_t'").await.unwrap();
        conn.execute("ALTER TABLE users ADD COLUMN name varchar(255)").await.unwrap();
        fetch_jobs(&mut conn, "1_t").await.unwrap();

        let uuid = conn.jobs_for("1_t")[0].uuid.clone();
        retry_job(&mut conn, &uuid).await.unwrap();

        let job = &conn.jobs_for("1_t")[0];
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.retries, 0);
    }
}
