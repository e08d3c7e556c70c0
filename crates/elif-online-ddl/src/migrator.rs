//! Per-unit execution handle
//!
//! A [`Migrator`] is what a migration body receives: it runs statements on the
//! unit's connection and carries the unit's correlation tag, its strategy
//! scopes and the jobs already seen terminal.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::debug;

use crate::config::OnlineDdlConfig;
use crate::connection::SchemaConnection;
use crate::error::OnlineDdlResult;
use crate::job::{fetch_jobs, JobRecord};
use crate::poller::{SeenSet, StatusPoller, WaitReport};
use crate::schema_builder::{SchemaBuilder, TableBuilder};
use crate::session::SessionContext;
use crate::strategy::DdlStrategy;

static ACRONYM_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z\d]+)([A-Z][a-z])").expect("valid regex"));
static WORD_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

/// One migration unit being executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUnit {
    pub correlation_tag: String,
    pub direction: MigrationDirection,
    /// The unit has a single reversible body instead of explicit up/down bodies
    pub uses_change_method: bool,
    pub strategy: DdlStrategy,
}

impl ExecutionUnit {
    pub fn new(
        version: &str,
        name: &str,
        direction: MigrationDirection,
        uses_change_method: bool,
        strategy: DdlStrategy,
    ) -> Self {
        Self {
            correlation_tag: correlation_tag(version, name),
            direction,
            uses_change_method,
            strategy,
        }
    }

    /// Reverting a unit whose reversal is derived from its single body
    pub fn is_reverting_change_method(&self) -> bool {
        self.direction == MigrationDirection::Down && self.uses_change_method
    }
}

/// `<version>_<snake_case name>`
pub fn correlation_tag(version: &str, name: &str) -> String {
    format!("{}_{}", version, normalize_unit_name(name))
}

/// Convert a CamelCase unit name to snake_case (`CreateUsers` -> `create_users`)
pub fn normalize_unit_name(name: &str) -> String {
    let name = name.replace("::", "/");
    let name = ACRONYM_BOUNDARY.replace_all(&name, "${1}_${2}");
    let name = WORD_BOUNDARY.replace_all(&name, "${1}_${2}");
    name.replace('-', "_").to_lowercase()
}

/// Execution handle for one migration unit
pub struct Migrator<'c> {
    pub(crate) conn: &'c mut dyn SchemaConnection,
    pub(crate) config: OnlineDdlConfig,
    pub(crate) unit: ExecutionUnit,
    pub(crate) session: SessionContext,
    pub(crate) seen: SeenSet,
    pub(crate) poller: StatusPoller,
    pub(crate) waits: Vec<WaitReport>,
}

impl<'c> Migrator<'c> {
    /// `wait_timeout` overrides the configured timeout for this unit's waits
    pub fn new(
        conn: &'c mut dyn SchemaConnection,
        unit: ExecutionUnit,
        config: OnlineDdlConfig,
        wait_timeout: Option<Duration>,
    ) -> Self {
        let poller = StatusPoller::new(config.poll_settings(wait_timeout));
        Self {
            conn,
            config,
            unit,
            session: SessionContext::new(),
            seen: SeenSet::new(),
            poller,
            waits: Vec::new(),
        }
    }

    pub fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    pub fn correlation_tag(&self) -> &str {
        &self.unit.correlation_tag
    }

    pub fn config(&self) -> &OnlineDdlConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Reports of every wait performed so far in this unit
    pub fn wait_reports(&self) -> &[WaitReport] {
        &self.waits
    }

    pub fn into_wait_reports(self) -> Vec<WaitReport> {
        self.waits
    }

    /// The unit's connection, for statements this crate has no helper for
    pub fn connection(&mut self) -> &mut dyn SchemaConnection {
        &mut *self.conn
    }

    /// Execute a statement on the unit's connection
    pub async fn execute(&mut self, sql: &str) -> OnlineDdlResult<u64> {
        debug!(tag = %self.unit.correlation_tag, "{}", sql);
        self.conn.execute(sql).await
    }

    /// Jobs the server has recorded for this unit so far
    pub async fn ddl_jobs(&mut self) -> OnlineDdlResult<Vec<JobRecord>> {
        fetch_jobs(&mut *self.conn, &self.unit.correlation_tag).await
    }

    /// Whether the server supports online DDL at all
    pub async fn supports_online_ddl(&mut self) -> OnlineDdlResult<bool> {
        self.session
            .supports_online_ddl(&mut *self.conn, self.config.get_capability_marker())
            .await
    }

    /// Block until every job tagged with this unit's tag is terminal
    pub async fn wait_for_ddl(&mut self) -> WaitReport {
        let report = self
            .poller
            .wait(&mut *self.conn, &self.unit.correlation_tag, &mut self.seen)
            .await;
        self.waits.push(report.clone());
        report
    }

    /// Run every statement of `schema`, letting table creations go through
    /// [`after_table_create`](Self::after_table_create)
    pub async fn apply_schema(&mut self, schema: SchemaBuilder) -> OnlineDdlResult<()> {
        let is_reverse_context = self.unit.is_reverting_change_method();
        for statement in schema.into_statements() {
            self.execute(&statement.sql).await?;
            if let Some(table) = statement.creates_table {
                self.after_table_create(&table, is_reverse_context).await?;
            }
        }
        Ok(())
    }

    pub async fn create_table<F>(&mut self, table_name: &str, define: F) -> OnlineDdlResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut schema = SchemaBuilder::new();
        schema.create_table(table_name, define);
        self.apply_schema(schema).await
    }

    pub async fn drop_table(&mut self, table_name: &str) -> OnlineDdlResult<()> {
        let mut schema = SchemaBuilder::new();
        schema.drop_table(table_name);
        self.apply_schema(schema).await
    }

    pub async fn add_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        column_type: &str,
    ) -> OnlineDdlResult<()> {
        let mut schema = SchemaBuilder::new();
        schema.add_column(table_name, column_name, column_type);
        self.apply_schema(schema).await
    }

    pub async fn drop_column(&mut self, table_name: &str, column_name: &str) -> OnlineDdlResult<()> {
        let mut schema = SchemaBuilder::new();
        schema.drop_column(table_name, column_name);
        self.apply_schema(schema).await
    }

    pub async fn add_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> OnlineDdlResult<()> {
        let mut schema = SchemaBuilder::new();
        schema.add_index(table_name, column_names, index_name);
        self.apply_schema(schema).await
    }

    pub async fn remove_index(&mut self, table_name: &str, index_name: &str) -> OnlineDdlResult<()> {
        let mut schema = SchemaBuilder::new();
        schema.remove_index(table_name, index_name);
        self.apply_schema(schema).await
    }
}
