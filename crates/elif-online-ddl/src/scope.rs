//! Strategy scopes
//!
//! A scope applies a DDL strategy to the session for the duration of some
//! work, waits for the online DDL jobs the work submitted and restores the
//! strategy that was active before, whether or not the work succeeded.

use futures::future::BoxFuture;
use tracing::{debug, error};

use crate::error::OnlineDdlResult;
use crate::migrator::Migrator;
use crate::strategy::DdlStrategy;

/// An entered strategy scope, to be closed with
/// [`Migrator::leave_strategy_scope`]
#[derive(Debug)]
#[must_use = "a strategy scope must be left to restore the session strategy"]
pub struct StrategyScope {
    strategy: DdlStrategy,
    switched: bool,
}

impl StrategyScope {
    pub fn strategy(&self) -> &DdlStrategy {
        &self.strategy
    }

    /// False when the server has no online DDL and the session was left alone
    pub fn switched(&self) -> bool {
        self.switched
    }
}

impl<'c> Migrator<'c> {
    /// Run `work` with `strategy` applied to the session
    ///
    /// ```ignore
    /// migrator
    ///     .with_ddl_strategy(DdlStrategy::direct(), |m| {
    ///         Box::pin(async move { m.add_column("users", "age", "INT").await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_ddl_strategy<T, F>(
        &mut self,
        strategy: impl Into<DdlStrategy>,
        work: F,
    ) -> OnlineDdlResult<T>
    where
        T: Send,
        F: for<'m> FnOnce(&'m mut Migrator<'c>) -> BoxFuture<'m, OnlineDdlResult<T>> + Send,
    {
        let scope = self.enter_strategy_scope(strategy.into()).await?;
        let result = work(self).await;
        self.leave_strategy_scope(scope, result).await
    }

    /// Save the session strategy and apply `strategy`
    ///
    /// On servers without online DDL nothing is changed and the returned
    /// scope is inert.
    pub async fn enter_strategy_scope(
        &mut self,
        strategy: DdlStrategy,
    ) -> OnlineDdlResult<StrategyScope> {
        if !self.supports_online_ddl().await? {
            debug!(strategy = %strategy, "Server has no online DDL, leaving ddl strategy unchanged");
            return Ok(StrategyScope {
                strategy,
                switched: false,
            });
        }

        self.session
            .push(&mut *self.conn, &strategy, &self.unit.correlation_tag)
            .await?;
        debug!(
            tag = %self.unit.correlation_tag,
            strategy = %strategy,
            depth = self.session.depth(),
            "Entered ddl strategy scope"
        );

        Ok(StrategyScope {
            strategy,
            switched: true,
        })
    }

    /// Close `scope` after its work produced `result`
    ///
    /// Successful tracked work is waited on first. The previous strategy is
    /// restored in every case and the work's error takes precedence over a
    /// restore failure.
    pub async fn leave_strategy_scope<T>(
        &mut self,
        scope: StrategyScope,
        result: OnlineDdlResult<T>,
    ) -> OnlineDdlResult<T> {
        if !scope.switched {
            return result;
        }

        if result.is_ok() && scope.strategy.is_tracked() {
            self.wait_for_ddl().await;
        }

        let restored = self.session.pop(&mut *self.conn).await;
        match (result, restored) {
            (Ok(value), Ok(frame)) => {
                debug!(strategy = %frame.previous, "Restored ddl strategy");
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(restore)) => {
                error!(
                    tag = %self.unit.correlation_tag,
                    "Failed to restore ddl strategy: {}", restore
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnlineDdlConfig;
    use crate::error::OnlineDdlError;
    use crate::job::JobStatus;
    use crate::migrator::{ExecutionUnit, MigrationDirection};
    use crate::strategy::DEFAULT_DDL_STRATEGY;
    use crate::testing::FakeVitess;

    fn unit() -> ExecutionUnit {
        ExecutionUnit::new(
            "20240101000000",
            "AddAgeToUsers",
            MigrationDirection::Up,
            false,
            DdlStrategy::default(),
        )
    }

    const TAG: &str = "20240101000000_add_age_to_users";

    #[tokio::test(start_paused = true)]
    async fn test_tracked_scope_waits_and_restores() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();
        let mut migrator = Migrator::new(&mut conn, unit(), OnlineDdlConfig::default(), None);

        migrator
            .with_ddl_strategy(DdlStrategy::default(), |m| {
                Box::pin(async move { m.add_column("users", "age", "INT").await })
            })
            .await
            .unwrap();

        assert_eq!(migrator.wait_reports().len(), 1);
        assert!(migrator.wait_reports()[0].outcome.is_complete());
        let jobs = handle.jobs_for(TAG);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert_eq!(handle.migration_context(), TAG);
        assert_eq!(handle.strategy_writes(), vec![DEFAULT_DDL_STRATEGY, "direct"]);
        assert_eq!(handle.ddl_strategy(), "direct");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_strategy_when_work_fails() {
        let mut conn = FakeVitess::new();
        conn.set_ddl_strategy("online");
        let handle = conn.clone();
        let mut migrator = Migrator::new(&mut conn, unit(), OnlineDdlConfig::default(), None);

        let result: OnlineDdlResult<()> = migrator
            .with_ddl_strategy("vitess", |m| {
                Box::pin(async move {
                    m.add_column("users", "age", "INT").await?;
                    Err(OnlineDdlError::Migration("boom".to_string()))
                })
            })
            .await;

        assert!(matches!(result, Err(OnlineDdlError::Migration(msg)) if msg == "boom"));
        assert_eq!(handle.ddl_strategy(), "online");
        // Failed work is not waited on.
        assert!(migrator.wait_reports().is_empty());
        assert_eq!(handle.status_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_scopes_restore_enclosing_strategy() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();
        let mut migrator = Migrator::new(&mut conn, unit(), OnlineDdlConfig::default(), None);

        let inner_handle = handle.clone();
        migrator
            .with_ddl_strategy(DdlStrategy::default(), move |m| {
                Box::pin(async move {
                    m.with_ddl_strategy(DdlStrategy::direct(), |m| {
                        Box::pin(async move { m.add_column("users", "nickname", "TEXT").await })
                    })
                    .await?;
                    assert_eq!(inner_handle.ddl_strategy(), DEFAULT_DDL_STRATEGY);
                    m.add_column("users", "age", "INT").await
                })
            })
            .await
            .unwrap();

        assert_eq!(handle.ddl_strategy(), "direct");
        assert_eq!(
            handle.strategy_writes(),
            vec![DEFAULT_DDL_STRATEGY, "direct", DEFAULT_DDL_STRATEGY, "direct"]
        );
        // Only the statement run under the tracked strategy became a job.
        let jobs = handle.jobs_for(TAG);
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].statement.contains("`age`"));
        assert_eq!(migrator.wait_reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_strategy_never_waits() {
        let mut conn = FakeVitess::new();
        let handle = conn.clone();
        let mut migrator = Migrator::new(&mut conn, unit(), OnlineDdlConfig::default(), None);

        migrator
            .with_ddl_strategy(DdlStrategy::direct(), |m| {
                Box::pin(async move { m.add_column("users", "age", "INT").await })
            })
            .await
            .unwrap();

        assert!(migrator.wait_reports().is_empty());
        assert_eq!(handle.status_polls(), 0);
        assert!(handle.jobs().is_empty());
        assert_eq!(handle.migration_context(), "");
    }

    #[tokio::test]
    async fn test_plain_mysql_is_left_alone() {
        let mut conn = FakeVitess::mysql();
        let handle = conn.clone();
        let mut migrator = Migrator::new(&mut conn, unit(), OnlineDdlConfig::default(), None);

        migrator
            .with_ddl_strategy(DdlStrategy::default(), |m| {
                Box::pin(async move { m.add_column("users", "age", "INT").await })
            })
            .await
            .unwrap();

        assert!(handle.strategy_writes().is_empty());
        assert_eq!(handle.status_polls(), 0);
        assert_eq!(migrator.session().depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_failure_surfaces_after_successful_work() {
        let mut conn = FakeVitess::new();
        conn.set_ddl_strategy("online");
        let handle = conn.clone();
        let mut migrator = Migrator::new(&mut conn, unit(), OnlineDdlConfig::default(), None);

        let scope = migrator
            .enter_strategy_scope(DdlStrategy::direct())
            .await
            .unwrap();
        assert!(scope.switched());
        handle.fail_statements_matching("SET @@ddl_strategy='online'", "read-only session");

        let result = migrator.leave_strategy_scope(scope, Ok(())).await;
        assert!(matches!(result, Err(OnlineDdlError::Database(msg)) if msg == "read-only session"));
        assert_eq!(migrator.session().depth(), 0);
    }
}
