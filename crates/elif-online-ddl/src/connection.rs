//! Database connection abstraction
//!
//! Online DDL tracking only needs a narrow slice of a database connection:
//! run a statement, and read rows back as text. Session variables such as
//! `@@ddl_strategy` live on a single connection, so implementations wrap one
//! connection rather than a pool.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Executor, Row};

use crate::error::{OnlineDdlError, OnlineDdlResult};

/// Connection used to submit schema changes and inspect their progress
#[async_trait]
pub trait SchemaConnection: Send {
    /// Execute a statement and return the affected rows count
    async fn execute(&mut self, sql: &str) -> OnlineDdlResult<u64>;

    /// Execute a query and return all result rows
    async fn fetch_all(&mut self, sql: &str) -> OnlineDdlResult<Vec<ResultRow>>;

    /// Execute a query and return the first column of the first row
    async fn fetch_scalar(&mut self, sql: &str) -> OnlineDdlResult<Option<String>> {
        let rows = self.fetch_all(sql).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get_by_index(0).map(str::to_string)))
    }
}

/// A result row with every value rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column to the row
    pub fn with(mut self, column: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.map(Into::into));
        self
    }

    /// Get a column value by name. `None` for both missing columns and NULL.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .and_then(|index| self.get_by_index(index))
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|value| value.as_deref())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns
            .iter()
            .any(|name| name.eq_ignore_ascii_case(column))
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// [`SchemaConnection`] over a single MySQL protocol connection (vtgate)
pub struct MySqlSchemaConnection {
    conn: MySqlConnection,
}

impl MySqlSchemaConnection {
    /// Connect to vtgate with a `mysql://` URL
    pub async fn connect(database_url: &str) -> OnlineDdlResult<Self> {
        let conn = MySqlConnection::connect(database_url)
            .await
            .map_err(OnlineDdlError::Connect)?;

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: MySqlConnection) -> Self {
        Self { conn }
    }

    pub fn into_inner(self) -> MySqlConnection {
        self.conn
    }

    /// Close the underlying connection
    pub async fn close(self) -> OnlineDdlResult<()> {
        self.conn.close().await?;
        Ok(())
    }

    fn convert_row(row: &MySqlRow) -> OnlineDdlResult<ResultRow> {
        let mut converted = ResultRow::new();
        for (index, column) in row.columns().iter().enumerate() {
            // Statements go over the text protocol, so every value arrives as text.
            let value: Option<String> =
                row.try_get_unchecked(index)
                    .map_err(|e| OnlineDdlError::Decode {
                        column: column.name().to_string(),
                        message: e.to_string(),
                    })?;
            converted = converted.with(column.name(), value);
        }
        Ok(converted)
    }
}

#[async_trait]
impl SchemaConnection for MySqlSchemaConnection {
    async fn execute(&mut self, sql: &str) -> OnlineDdlResult<u64> {
        // A bare &str keeps the statement off the prepared-statement path;
        // vtgate does not prepare SHOW/SET/ALTER VITESS_MIGRATION.
        let result = Executor::execute(&mut self.conn, sql).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str) -> OnlineDdlResult<Vec<ResultRow>> {
        let rows = Executor::fetch_all(&mut self.conn, sql).await?;
        rows.iter().map(Self::convert_row).collect()
    }
}

/// Render a value as a single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}
