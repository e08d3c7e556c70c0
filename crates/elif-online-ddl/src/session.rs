//! Session variable bookkeeping
//!
//! `@@ddl_strategy` and `@@migration_context` are per-connection session
//! variables. Strategy scopes nest (a unit-wide scope plus statement-level
//! scopes inside the unit body), so the saved values form a stack: popping a
//! frame restores the strategy that was active when the frame was pushed.

use tracing::debug;

use crate::connection::{quote_literal, SchemaConnection};
use crate::error::{OnlineDdlError, OnlineDdlResult};
use crate::strategy::DdlStrategy;

/// One entered strategy scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFrame {
    /// `@@ddl_strategy` as read before the scope was entered
    pub previous: String,
    pub active: DdlStrategy,
}

/// Strategy state layered onto a database session
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    frames: Vec<StrategyFrame>,
    online_ddl: Option<bool>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the server supports online DDL, probed once per session
    pub async fn supports_online_ddl(
        &mut self,
        conn: &mut dyn SchemaConnection,
        capability_marker: &str,
    ) -> OnlineDdlResult<bool> {
        if let Some(supported) = self.online_ddl {
            return Ok(supported);
        }

        let version = conn.fetch_scalar("SELECT VERSION()").await?.unwrap_or_default();
        let supported = version.contains(capability_marker);
        debug!(version = %version, supported, "Probed server for online DDL support");
        self.online_ddl = Some(supported);
        Ok(supported)
    }

    /// Current `@@ddl_strategy` of the session
    pub async fn read_strategy(conn: &mut dyn SchemaConnection) -> OnlineDdlResult<String> {
        Ok(conn
            .fetch_scalar("SELECT @@ddl_strategy")
            .await?
            .unwrap_or_default())
    }

    /// Save the current strategy, then apply `strategy` and, for tracked
    /// strategies, tag the session with `correlation_tag`
    pub async fn push(
        &mut self,
        conn: &mut dyn SchemaConnection,
        strategy: &DdlStrategy,
        correlation_tag: &str,
    ) -> OnlineDdlResult<()> {
        let previous = Self::read_strategy(conn).await?;
        set_variable(conn, "ddl_strategy", strategy.as_str()).await?;
        self.frames.push(StrategyFrame {
            previous,
            active: strategy.clone(),
        });

        if strategy.is_tracked() {
            if let Err(e) = set_variable(conn, "migration_context", correlation_tag).await {
                if let Err(restore) = self.pop(conn).await {
                    debug!("Failed to restore ddl strategy: {}", restore);
                }
                return Err(e);
            }
        }

        Ok(())
    }

    /// Restore the strategy saved by the innermost [`push`](Self::push)
    ///
    /// The frame is dropped even when the restore statement fails.
    pub async fn pop(&mut self, conn: &mut dyn SchemaConnection) -> OnlineDdlResult<StrategyFrame> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| OnlineDdlError::Session("no ddl strategy scope to restore".to_string()))?;

        set_variable(conn, "ddl_strategy", &frame.previous).await?;
        Ok(frame)
    }

    /// Strategy of the innermost scope
    pub fn active(&self) -> Option<&DdlStrategy> {
        self.frames.last().map(|frame| &frame.active)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

async fn set_variable(
    conn: &mut dyn SchemaConnection,
    variable: &str,
    value: &str,
) -> OnlineDdlResult<()> {
    debug!("SET @@{} = {}", variable, value);
    conn.execute(&format!("SET @@{}={}", variable, quote_literal(value)))
        .await?;
    Ok(())
}
