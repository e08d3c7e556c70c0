//! DDL strategies
//!
//! A strategy is the value of the `@@ddl_strategy` session variable: a
//! strategy name optionally followed by flags, e.g.
//! `vitess --prefer-instant-ddl --fast-range-rotation`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy used when a migration does not pick its own.
pub const DEFAULT_DDL_STRATEGY: &str = "vitess --prefer-instant-ddl --fast-range-rotation";

/// Synchronous strategy; statements run in order and are never tracked.
pub const DIRECT_STRATEGY: &str = "direct";

/// The execution mode a DDL statement is submitted under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DdlStrategy(String);

impl DdlStrategy {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self(strategy.into().trim().to_string())
    }

    pub fn direct() -> Self {
        Self(DIRECT_STRATEGY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strategy name without flags
    pub fn name(&self) -> &str {
        self.0.split_whitespace().next().unwrap_or("")
    }

    /// Flags following the strategy name
    pub fn flags(&self) -> Vec<&str> {
        self.0.split_whitespace().skip(1).collect()
    }

    /// Only the bare `direct` strategy runs DDL synchronously; `direct` with
    /// flags is handed to the server like any other strategy.
    pub fn is_direct(&self) -> bool {
        self.0 == DIRECT_STRATEGY
    }

    /// Statements submitted under a non-direct strategy produce server jobs
    /// that carry the session's migration context and must be waited on.
    pub fn is_tracked(&self) -> bool {
        !self.is_direct()
    }
}

impl Default for DdlStrategy {
    fn default() -> Self {
        Self(DEFAULT_DDL_STRATEGY.to_string())
    }
}

impl fmt::Display for DdlStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DdlStrategy {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DdlStrategy {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&DdlStrategy> for DdlStrategy {
    fn from(value: &DdlStrategy) -> Self {
        value.clone()
    }
}
