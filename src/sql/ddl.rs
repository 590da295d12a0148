//! DDL Generation for registered entities
//!
//! Generates the idempotent SQLite statements that back schema synthesis.

use crate::schema::RegisteredSchema;
use crate::sql::sanitize::quote_identifier;
use crate::types::ColumnSpec;

/// Surrogate key column placed first in every entity table
pub const ID_COLUMN_DEFINITION: &str = "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT";

/// Introspection query; the table name is bound as `?1`
///
/// Returns no rows when the table does not exist.
pub const TABLE_INFO_QUERY: &str =
    "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid";

/// DDL Generator for entity tables
pub struct DdlGenerator<'a> {
    schema: &'a RegisteredSchema,
}

impl<'a> DdlGenerator<'a> {
    /// Create a new DDL generator for a registered schema
    pub fn new(schema: &'a RegisteredSchema) -> Self {
        Self { schema }
    }

    /// Generate CREATE TABLE IF NOT EXISTS statement
    ///
    /// Creates a table with:
    /// - `id INTEGER PRIMARY KEY AUTOINCREMENT` first (ids are never reused)
    /// - One column per declared field, in declaration order
    pub fn generate_create_table(&self) -> String {
        let mut column_defs = vec![ID_COLUMN_DEFINITION.to_string()];

        for (field, spec) in self.schema.field_specs() {
            column_defs.push(Self::format_column_definition(&field.name, spec));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&self.schema.table_name),
            column_defs.join(", ")
        )
    }

    /// Format a single column definition
    pub fn format_column_definition(name: &str, spec: &ColumnSpec) -> String {
        let quoted = quote_identifier(name);
        let mut parts = vec![quoted.clone(), spec.sql_type.to_string()];

        if !spec.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default) = &spec.default_literal {
            parts.push(format!("DEFAULT {}", default));
        }

        if spec.zero_one_check {
            parts.push(format!("CHECK ({} IN (0, 1))", quoted));
        }

        parts.join(" ")
    }
}
