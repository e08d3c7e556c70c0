//! Schema Builder - DSL for online schema changes
//!
//! Builds MySQL statements for the schema changes a migration submits. Vitess
//! turns every statement into its own online DDL job, so statements are kept
//! separate and rendered without a trailing semicolon.

/// A statement produced by [`SchemaBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatement {
    pub sql: String,
    /// Table created by the statement, if it is a `CREATE TABLE`
    pub creates_table: Option<String>,
}

impl SchemaStatement {
    fn new(sql: String) -> Self {
        Self {
            sql,
            creates_table: None,
        }
    }
}

/// Basic schema operations for migrations
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    statements: Vec<SchemaStatement>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);

        self.statements.push(SchemaStatement {
            sql: table_builder.to_sql(),
            creates_table: Some(table_name.to_string()),
        });
        self
    }

    /// Drop a table
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.statements.push(SchemaStatement::new(format!(
            "DROP TABLE IF EXISTS {}",
            quote_identifier(table_name)
        )));
        self
    }

    /// Add a column to existing table
    pub fn add_column(
        &mut self,
        table_name: &str,
        column_name: &str,
        column_type: &str,
    ) -> &mut Self {
        self.statements.push(SchemaStatement::new(format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_identifier(table_name),
            quote_identifier(column_name),
            column_type
        )));
        self
    }

    /// Drop a column from existing table
    pub fn drop_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.statements.push(SchemaStatement::new(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_identifier(table_name),
            quote_identifier(column_name)
        )));
        self
    }

    /// Create an index
    pub fn add_index(
        &mut self,
        table_name: &str,
        column_names: &[&str],
        index_name: Option<&str>,
    ) -> &mut Self {
        let default_name = index_name_for(table_name, column_names);
        let index_name = index_name.unwrap_or(&default_name);
        self.statements.push(SchemaStatement::new(format!(
            "ALTER TABLE {} ADD INDEX {} ({})",
            quote_identifier(table_name),
            quote_identifier(index_name),
            quote_list(column_names)
        )));
        self
    }

    /// Drop an index
    pub fn remove_index(&mut self, table_name: &str, index_name: &str) -> &mut Self {
        self.statements.push(SchemaStatement::new(format!(
            "ALTER TABLE {} DROP INDEX {}",
            quote_identifier(table_name),
            quote_identifier(index_name)
        )));
        self
    }

    /// Get all statements
    pub fn statements(&self) -> &[SchemaStatement] {
        &self.statements
    }

    /// Get all SQL statements
    pub fn to_sql(&self) -> Vec<String> {
        self.statements.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn into_statements(self) -> Vec<SchemaStatement> {
        self.statements
    }
}

/// Table builder for CREATE TABLE statements
#[derive(Debug, Clone)]
pub struct TableBuilder {
    table_name: String,
    columns: Vec<String>,
    constraints: Vec<String>,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a column
    pub fn column(&mut self, name: &str, column_type: &str) -> &mut Self {
        self.columns
            .push(format!("{} {}", quote_identifier(name), column_type));
        self
    }

    /// Add an ID column (auto-increment primary key)
    pub fn id(&mut self, name: &str) -> &mut Self {
        self.column(name, "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY")
    }

    /// Add a string column, `VARCHAR(255)` unless a length is given
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut Self {
        let column_type = format!("VARCHAR({})", length.unwrap_or(255));
        self.column(name, &column_type)
    }

    pub fn text(&mut self, name: &str) -> &mut Self {
        self.column(name, "TEXT")
    }

    pub fn integer(&mut self, name: &str) -> &mut Self {
        self.column(name, "INT")
    }

    pub fn bigint(&mut self, name: &str) -> &mut Self {
        self.column(name, "BIGINT")
    }

    pub fn boolean(&mut self, name: &str) -> &mut Self {
        self.column(name, "TINYINT(1)")
    }

    /// Add timestamp columns
    pub fn timestamps(&mut self) -> &mut Self {
        self.column("created_at", "DATETIME(6) NOT NULL");
        self.column("updated_at", "DATETIME(6) NOT NULL")
    }

    /// Add a unique key
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints.push(format!(
            "UNIQUE KEY {} ({})",
            quote_identifier(&index_name_for(&self.table_name, columns)),
            quote_list(columns)
        ));
        self
    }

    /// Add a secondary index
    pub fn index(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints.push(format!(
            "KEY {} ({})",
            quote_identifier(&index_name_for(&self.table_name, columns)),
            quote_list(columns)
        ));
        self
    }

    /// Add a foreign key
    pub fn foreign_key(&mut self, column: &str, references_table: &str, references_column: &str) -> &mut Self {
        self.constraints.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_identifier(&format!("fk_{}_{}", self.table_name, column)),
            quote_identifier(column),
            quote_identifier(references_table),
            quote_identifier(references_column)
        ));
        self
    }

    /// Build the CREATE TABLE SQL
    pub fn to_sql(&self) -> String {
        let mut parts = self.columns.clone();
        parts.extend(self.constraints.clone());

        format!(
            "CREATE TABLE {} (\n  {}\n)",
            quote_identifier(&self.table_name),
            parts.join(",\n  ")
        )
    }
}

fn index_name_for(table_name: &str, columns: &[&str]) -> String {
    format!("index_{}_on_{}", table_name, columns.join("_and_"))
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder() {
        let mut builder = SchemaBuilder::new();
        builder.create_table("users", |table| {
            table.id("id");
            table.string("name", None);
            table.string("email", Some(320));
            table.timestamps();
            table.unique(&["email"]);
        });

        let statements = builder.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].creates_table.as_deref(), Some("users"));

        let sql = &statements[0].sql;
        assert!(sql.starts_with("CREATE TABLE `users` ("));
        assert!(sql.contains("`id` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY"));
        assert!(sql.contains("`name` VARCHAR(255)"));
        assert!(sql.contains("`email` VARCHAR(320)"));
        assert!(sql.contains("`created_at` DATETIME(6) NOT NULL"));
        assert!(sql.contains("UNIQUE KEY `index_users_on_email` (`email`)"));
        assert!(!sql.ends_with(';'));
    }

    #[test]
    fn test_alter_statements() {
        let mut builder = SchemaBuilder::new();
        builder
            .add_column("users", "age", "INT")
            .add_index("users", &["name", "age"], None)
            .remove_index("users", "index_users_on_name_and_age")
            .drop_column("users", "age")
            .drop_table("users");

        assert_eq!(
            builder.to_sql(),
            vec![
                "ALTER TABLE `users` ADD COLUMN `age` INT",
                "ALTER TABLE `users` ADD INDEX `index_users_on_name_and_age` (`name`, `age`)",
                "ALTER TABLE `users` DROP INDEX `index_users_on_name_and_age`",
                "ALTER TABLE `users` DROP COLUMN `age`",
                "DROP TABLE IF EXISTS `users`",
            ]
        );
        assert!(builder
            .statements()
            .iter()
            .all(|statement| statement.creates_table.is_none()));
    }

    #[test]
    fn test_foreign_key() {
        let mut table = TableBuilder::new("posts");
        table.id("id").bigint("user_id").foreign_key("user_id", "users", "id");

        assert!(table.to_sql().contains(
            "CONSTRAINT `fk_posts_user_id` FOREIGN KEY (`user_id`) REFERENCES `users` (`id`)"
        ));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let mut table = TableBuilder::new("odd`name");
        table.integer("count");
        assert!(table.to_sql().starts_with("CREATE TABLE `odd``name` ("));
    }
}
