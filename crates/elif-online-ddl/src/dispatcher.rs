//! Table creation hook
//!
//! Statements later in a unit commonly reference a table the unit just
//! created. Under a tracked strategy the `CREATE TABLE` only queues a job, so
//! the hook waits for it before the unit continues.

use tracing::debug;

use crate::error::OnlineDdlResult;
use crate::migrator::Migrator;
use crate::poller::WaitReport;
use crate::session::SessionContext;

/// What [`Migrator::after_table_create`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    /// The table was created while reverting a change-method unit
    SkippedRevert,
    /// The server or the session strategy does not run online DDL
    SkippedUntracked,
    Waited(WaitReport),
}

impl DispatchDecision {
    pub fn waited(&self) -> bool {
        matches!(self, DispatchDecision::Waited(_))
    }
}

impl<'c> Migrator<'c> {
    /// Called after `table_name` has been created
    pub async fn after_table_create(
        &mut self,
        table_name: &str,
        is_reverse_context: bool,
    ) -> OnlineDdlResult<DispatchDecision> {
        if is_reverse_context {
            debug!(table = %table_name, "Reverting, not waiting for table creation");
            return Ok(DispatchDecision::SkippedRevert);
        }

        if !self.session_runs_online_ddl().await? {
            debug!(table = %table_name, "Table created without online DDL");
            return Ok(DispatchDecision::SkippedUntracked);
        }

        debug!(
            tag = %self.unit.correlation_tag,
            table = %table_name,
            "Waiting for table creation"
        );
        Ok(DispatchDecision::Waited(self.wait_for_ddl().await))
    }

    async fn session_runs_online_ddl(&mut self) -> OnlineDdlResult<bool> {
        if !self.supports_online_ddl().await? {
            return Ok(false);
        }
        let strategy = SessionContext::read_strategy(&mut *self.conn).await?;
        Ok(strategy.contains(self.config.get_tracked_strategy_marker().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OnlineDdlConfig, OnlineDdlConfigBuilder};
    use crate::job::JobStatus;
    use crate::migrator::{ExecutionUnit, MigrationDirection};
    use crate::strategy::DdlStrategy;
    use crate::testing::FakeVitess;

    fn unit(direction: MigrationDirection) -> ExecutionUnit {
        ExecutionUnit::new("1", "CreateUsers", direction, true, DdlStrategy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_tracked_table_creation() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();
        let mut migrator = Migrator::new(
            &mut conn,
            unit(MigrationDirection::Up),
            OnlineDdlConfig::default(),
            None,
        );
        let scope = migrator
            .enter_strategy_scope(DdlStrategy::default())
            .await
            .unwrap();

        migrator
            .create_table("users", |t| {
                t.id("id");
                t.string("name", None);
            })
            .await
            .unwrap();

        // The create is visible before the unit-end wait.
        assert_eq!(migrator.wait_reports().len(), 1);
        assert!(handle.has_table("users"));
        assert_eq!(handle.jobs_for("1_create_users")[0].status, JobStatus::Complete);

        migrator.leave_strategy_scope(scope, Ok(())).await.unwrap();
        // The unit-end wait found nothing new to report.
        assert!(migrator.wait_reports()[1].newly_terminal.is_empty());
    }

    #[tokio::test]
    async fn test_skips_while_reverting_change_method() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();
        let mut migrator = Migrator::new(
            &mut conn,
            unit(MigrationDirection::Down),
            OnlineDdlConfig::default(),
            None,
        );

        let decision = migrator.after_table_create("users", true).await.unwrap();

        assert_eq!(decision, DispatchDecision::SkippedRevert);
        assert!(handle.executed().is_empty());
    }

    #[tokio::test]
    async fn test_skips_under_direct_strategy() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();
        let mut migrator = Migrator::new(
            &mut conn,
            unit(MigrationDirection::Up),
            OnlineDdlConfig::default(),
            None,
        );

        migrator
            .create_table("users", |t| {
                t.id("id");
            })
            .await
            .unwrap();

        assert!(migrator.wait_reports().is_empty());
        assert!(handle.has_table("users"));
        assert_eq!(handle.status_polls(), 0);
    }

    #[tokio::test]
    async fn test_skips_on_plain_mysql() {
        let mut conn = FakeVitess::mysql();
        let mut migrator = Migrator::new(
            &mut conn,
            unit(MigrationDirection::Up),
            OnlineDdlConfig::default(),
            None,
        );

        let decision = migrator.after_table_create("users", false).await.unwrap();
        assert_eq!(decision, DispatchDecision::SkippedUntracked);
        assert!(!decision.waited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_marker_comes_from_config() {
        let mut conn = FakeVitess::new();
        let config = OnlineDdlConfigBuilder::new()
            .tracked_strategy_marker("online".to_string())
            .build()
            .expect("Failed to build config");
        let mut migrator = Migrator::new(&mut conn, unit(MigrationDirection::Up), config, None);
        let scope = migrator
            .enter_strategy_scope(DdlStrategy::from("online"))
            .await
            .unwrap();

        let decision = migrator.after_table_create("users", false).await.unwrap();

        assert!(decision.waited());
        migrator.leave_strategy_scope(scope, Ok(())).await.unwrap();
    }

    #[tokio::test]
    async fn test_capability_marker_comes_from_config() {
        let mut conn = FakeVitess::new();
        conn.set_ddl_strategy("vitess");
        let config = OnlineDdlConfigBuilder::new()
            .capability_marker("PlanetScale".to_string())
            .build()
            .expect("Failed to build config");
        let mut migrator = Migrator::new(&mut conn, unit(MigrationDirection::Up), config, None);

        let decision = migrator.after_table_create("users", false).await.unwrap();

        assert_eq!(decision, DispatchDecision::SkippedUntracked);
        assert!(!migrator.supports_online_ddl().await.unwrap());
    }
}
