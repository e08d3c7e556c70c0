//! # elif-online-ddl
//!
//! Vitess online DDL tracking for elif.rs migrations.
//!
//! Under a Vitess strategy a schema change statement returns as soon as the
//! server has queued it as an online DDL job. This crate tags every job a
//! migration unit submits with the unit's correlation tag and blocks until
//! all of them have completed, failed or been cancelled.
//!
//! ## Features
//!
//! - **Strategy scopes**: apply `@@ddl_strategy` for a unit or a block of
//!   statements, always restoring the previous strategy
//! - **Status polling**: `SHOW VITESS_MIGRATIONS` with capped exponential
//!   backoff and a timeout, never failing the migration itself
//! - **Table creation hook**: waits for `CREATE TABLE` before later statements
//!   reference the table
//! - **Plain MySQL fallback**: servers without online DDL run statements as-is
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use elif_online_ddl::{
//!     Migration, MigrationDirection, MigrationRunner, Migrator, MySqlSchemaConnection,
//!     OnlineDdlConfig, OnlineDdlResult,
//! };
//!
//! struct CreateUsers;
//!
//! #[async_trait]
//! impl Migration for CreateUsers {
//!     fn version(&self) -> &str {
//!         "20240101000000"
//!     }
//!
//!     fn name(&self) -> &str {
//!         "CreateUsers"
//!     }
//!
//!     fn uses_change_method(&self) -> bool {
//!         true
//!     }
//!
//!     async fn up(&self, m: &mut Migrator<'_>) -> OnlineDdlResult<()> {
//!         m.create_table("users", |t| {
//!             t.id("id");
//!             t.string("email", None);
//!         })
//!         .await?;
//!         m.add_index("users", &["email"], None).await
//!     }
//!
//!     async fn down(&self, m: &mut Migrator<'_>) -> OnlineDdlResult<()> {
//!         m.drop_table("users").await
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut conn = MySqlSchemaConnection::connect("mysql://root@127.0.0.1:15306/commerce").await?;
//! let migrations: Vec<Box<dyn Migration>> = vec![Box::new(CreateUsers)];
//!
//! MigrationRunner::new(OnlineDdlConfig::default())
//!     .run(&mut conn, &migrations, MigrationDirection::Up)
//!     .await?;
//! # Ok::<(), elif_online_ddl::OnlineDdlError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod logging;
pub mod migrator;
pub mod poller;
pub mod runner;
pub mod schema_builder;
pub mod scope;
pub mod session;
pub mod strategy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use config::{OnlineDdlConfig, OnlineDdlConfigBuilder};
pub use connection::{MySqlSchemaConnection, ResultRow, SchemaConnection};
pub use dispatcher::DispatchDecision;
pub use error::{ConfigError, OnlineDdlError, OnlineDdlResult};
pub use job::{cancel_job, complete_job, fetch_jobs, retry_job, JobRecord, JobStatus};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use migrator::{correlation_tag, ExecutionUnit, MigrationDirection, Migrator};
pub use poller::{PollSettings, SeenSet, StatusPoller, WaitOutcome, WaitReport};
pub use runner::{Migration, MigrationOptions, MigrationRunResult, MigrationRunner, UnitReport};
pub use schema_builder::{SchemaBuilder, TableBuilder};
pub use scope::StrategyScope;
pub use session::SessionContext;
pub use strategy::{DdlStrategy, DEFAULT_DDL_STRATEGY};
