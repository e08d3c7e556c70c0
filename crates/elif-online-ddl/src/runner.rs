//! Migration Runner - Executes migration units with online DDL tracking
//!
//! Every unit runs inside a strategy scope opened with the unit's default
//! strategy and tagged with the unit's correlation tag, so all DDL the unit
//! submits is waited on before the next unit starts.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::OnlineDdlConfig;
use crate::connection::SchemaConnection;
use crate::error::{OnlineDdlError, OnlineDdlResult};
use crate::migrator::{ExecutionUnit, MigrationDirection, Migrator};
use crate::poller::WaitReport;
use crate::strategy::DdlStrategy;

/// Per-unit overrides of the runner configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Strategy the unit runs under instead of the configured default
    pub default_strategy: Option<DdlStrategy>,
    /// Timeout of the unit's waits instead of the configured one
    pub wait_timeout: Option<Duration>,
}

impl MigrationOptions {
    pub fn with_strategy(mut self, strategy: impl Into<DdlStrategy>) -> Self {
        self.default_strategy = Some(strategy.into());
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

/// A migration unit
#[async_trait]
pub trait Migration: Send + Sync {
    /// Version prefix, usually a timestamp like `20240101000000`
    fn version(&self) -> &str;

    /// CamelCase unit name, e.g. `CreateUsers`
    fn name(&self) -> &str;

    fn options(&self) -> MigrationOptions {
        MigrationOptions::default()
    }

    /// True when `down` is the mechanical reversal of `up` rather than a
    /// hand-written body
    fn uses_change_method(&self) -> bool {
        false
    }

    async fn up(&self, migrator: &mut Migrator<'_>) -> OnlineDdlResult<()>;

    async fn down(&self, _migrator: &mut Migrator<'_>) -> OnlineDdlResult<()> {
        Err(OnlineDdlError::Migration(format!(
            "{} cannot be reverted",
            self.name()
        )))
    }
}

/// Outcome of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub correlation_tag: String,
    pub direction: MigrationDirection,
    pub strategy: DdlStrategy,
    /// Every wait performed while the unit ran, in order
    pub waits: Vec<WaitReport>,
    pub execution_time_ms: u128,
}

/// Outcome of a [`MigrationRunner::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRunResult {
    pub units: Vec<UnitReport>,
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.units.len()
    }
}

/// Runs migration units one after another on a single connection
#[derive(Debug, Clone, Default)]
pub struct MigrationRunner {
    config: OnlineDdlConfig,
}

impl MigrationRunner {
    pub fn new(config: OnlineDdlConfig) -> Self {
        Self { config }
    }

    /// Create a runner configured from `ELIF_DDL_*` environment variables
    pub fn from_env() -> OnlineDdlResult<Self> {
        Ok(Self::new(OnlineDdlConfig::from_env()?))
    }

    pub fn config(&self) -> &OnlineDdlConfig {
        &self.config
    }

    /// Strategy `migration` runs under
    pub fn before_unit(&self, migration: &dyn Migration) -> DdlStrategy {
        migration
            .options()
            .default_strategy
            .unwrap_or_else(|| self.config.strategy())
    }

    pub fn execution_unit(
        &self,
        migration: &dyn Migration,
        direction: MigrationDirection,
    ) -> ExecutionUnit {
        ExecutionUnit::new(
            migration.version(),
            migration.name(),
            direction,
            migration.uses_change_method(),
            self.before_unit(migration),
        )
    }

    /// Run one unit inside a strategy scope
    pub async fn around_unit(
        &self,
        conn: &mut dyn SchemaConnection,
        migration: &dyn Migration,
        direction: MigrationDirection,
    ) -> OnlineDdlResult<UnitReport> {
        let start_time = Instant::now();
        let unit = self.execution_unit(migration, direction);
        info!(
            tag = %unit.correlation_tag,
            strategy = %unit.strategy,
            "Running migration {} ({:?})",
            unit.correlation_tag,
            direction
        );

        let mut migrator = Migrator::new(
            conn,
            unit.clone(),
            self.config.clone(),
            migration.options().wait_timeout,
        );

        let scope = migrator.enter_strategy_scope(unit.strategy.clone()).await?;
        let result = match direction {
            MigrationDirection::Up => migration.up(&mut migrator).await,
            MigrationDirection::Down => migration.down(&mut migrator).await,
        };
        let result = migrator.leave_strategy_scope(scope, result).await;
        let waits = migrator.into_wait_reports();

        if let Err(e) = result {
            error!(tag = %unit.correlation_tag, "Migration {} failed: {}", unit.correlation_tag, e);
            return Err(e);
        }

        Ok(UnitReport {
            correlation_tag: unit.correlation_tag,
            direction,
            strategy: unit.strategy,
            waits,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Run `migrations` in order, or in reverse order when reverting
    ///
    /// Stops at the first failing unit.
    pub async fn run(
        &self,
        conn: &mut dyn SchemaConnection,
        migrations: &[Box<dyn Migration>],
        direction: MigrationDirection,
    ) -> OnlineDdlResult<MigrationRunResult> {
        let start_time = Instant::now();
        let ordered: Vec<&dyn Migration> = match direction {
            MigrationDirection::Up => migrations.iter().map(|m| &**m).collect(),
            MigrationDirection::Down => migrations.iter().rev().map(|m| &**m).collect(),
        };

        let mut units = Vec::with_capacity(ordered.len());
        for migration in ordered {
            units.push(self.around_unit(&mut *conn, migration, direction).await?);
        }

        info!(count = units.len(), "Migration run finished");
        Ok(MigrationRunResult {
            units,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::DEFAULT_DDL_STRATEGY;
    use crate::testing::FakeVitess;

    struct AddAge {
        options: MigrationOptions,
    }

    #[async_trait]
    impl Migration for AddAge {
        fn version(&self) -> &str {
            "20240102000000"
        }

        fn name(&self) -> &str {
            "AddAgeToUsers"
        }

        fn options(&self) -> MigrationOptions {
            self.options.clone()
        }

        async fn up(&self, migrator: &mut Migrator<'_>) -> OnlineDdlResult<()> {
            migrator.add_column("users", "age", "INT").await
        }
    }

    struct Broken;

    #[async_trait]
    impl Migration for Broken {
        fn version(&self) -> &str {
            "20240103000000"
        }

        fn name(&self) -> &str {
            "Broken"
        }

        async fn up(&self, migrator: &mut Migrator<'_>) -> OnlineDdlResult<()> {
            migrator.execute("ALTER TABLE missing ADD COLUMN x INT").await?;
            Ok(())
        }
    }

    fn add_age() -> AddAge {
        AddAge {
            options: MigrationOptions::default(),
        }
    }

    #[test]
    fn test_before_unit_uses_configured_default() {
        let runner = MigrationRunner::default();
        assert_eq!(runner.before_unit(&add_age()).as_str(), DEFAULT_DDL_STRATEGY);

        let overridden = AddAge {
            options: MigrationOptions::default().with_strategy("direct"),
        };
        assert!(runner.before_unit(&overridden).is_direct());
    }

    #[test]
    fn test_execution_unit() {
        let unit = MigrationRunner::default().execution_unit(&add_age(), MigrationDirection::Up);
        assert_eq!(unit.correlation_tag, "20240102000000_add_age_to_users");
        assert!(!unit.uses_change_method);
    }

    #[tokio::test(start_paused = true)]
    async fn test_around_unit_waits_for_unit_jobs() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();

        let report = MigrationRunner::default()
            .around_unit(&mut conn, &add_age(), MigrationDirection::Up)
            .await
            .unwrap();

        assert_eq!(report.correlation_tag, "20240102000000_add_age_to_users");
        assert_eq!(report.waits.len(), 1);
        assert!(report.waits[0].outcome.is_complete());
        assert_eq!(handle.jobs_for(&report.correlation_tag).len(), 1);
        assert_eq!(handle.ddl_strategy(), "direct");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_wait_timeout_override() {
        let mut conn = FakeVitess::new();
        conn.stall_next_job();
        let migration = AddAge {
            options: MigrationOptions::default().with_wait_timeout(Duration::from_secs(5)),
        };

        let report = MigrationRunner::default()
            .around_unit(&mut conn, &migration, MigrationDirection::Up)
            .await
            .unwrap();

        let wait = &report.waits[0];
        assert!(!wait.outcome.is_complete());
        assert!(wait.elapsed <= Duration::from_secs(5) + Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_unit_stops_run_and_restores_strategy() {
        let mut conn = FakeVitess::new();
        conn.set_ddl_strategy("online");
        conn.fail_statements_matching("missing ADD", "Table 'missing' doesn't exist");
        let handle = conn.clone();

        let migrations: Vec<Box<dyn Migration>> = vec![Box::new(add_age()), Box::new(Broken)];
        let err = MigrationRunner::default()
            .run(&mut conn, &migrations, MigrationDirection::Up)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("doesn't exist"));
        assert_eq!(handle.ddl_strategy(), "online");
        assert_eq!(handle.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_down_without_body_is_an_error() {
        let mut conn = FakeVitess::new();
        let result = MigrationRunner::default()
            .around_unit(&mut conn, &add_age(), MigrationDirection::Down)
            .await;

        assert!(matches!(result, Err(OnlineDdlError::Migration(_))));
        assert_eq!(conn.ddl_strategy(), "direct");
    }
}
