//! Registered schemas and schema synthesis
//!
//! A [`RegisteredSchema`] is the validated, physical form of an
//! [`EntityDefinition`]: a normalized table name plus one column spec per
//! field. [`ensure_table`] makes sure the backing table exists and matches.

use std::collections::HashSet;

use sqlx::{Row, SqliteConnection};

use crate::error::{DatastoreError, Result};
use crate::sql::ddl::{DdlGenerator, TABLE_INFO_QUERY};
use crate::sql::sanitize::{normalize_table_name, validate_identifier};
use crate::types::{ColumnSpec, EntityDefinition, FieldDefinition, ValueType};

/// Physical column as seen through `pragma_table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

impl ColumnInfo {
    fn matches(&self, other: &ColumnInfo) -> bool {
        self.name == other.name
            && self.sql_type.eq_ignore_ascii_case(&other.sql_type)
            && self.not_null == other.not_null
            && self.primary_key == other.primary_key
    }
}

/// Mapping from an entity definition to its table and columns
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredSchema {
    /// Normalized table name; also the registry key
    pub table_name: String,
    /// The definition as registered
    pub definition: EntityDefinition,
    specs: Vec<ColumnSpec>,
}

impl RegisteredSchema {
    /// Validate a definition and derive its physical layout
    ///
    /// Fails with a validation error for an unusable entity or field name or a
    /// duplicated field, and with whatever the type mapper reports for a field.
    pub fn build(definition: EntityDefinition) -> Result<Self> {
        let table_name =
            normalize_table_name(&definition.name).map_err(DatastoreError::validation)?;

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(definition.fields.len());

        for field in &definition.fields {
            validate_identifier(&field.name).map_err(|e| {
                DatastoreError::validation(format!("Entity '{}': {}", definition.name, e))
            })?;

            if !seen.insert(field.name.as_str()) {
                return Err(DatastoreError::validation(format!(
                    "Entity '{}' declares field '{}' more than once",
                    definition.name, field.name
                )));
            }

            let spec = field.column_spec().map_err(|e| match e {
                DatastoreError::Validation(msg) => DatastoreError::validation(format!(
                    "Field '{}.{}': {}",
                    definition.name, field.name, msg
                )),
                other => other,
            })?;
            specs.push(spec);
        }

        Ok(Self {
            table_name,
            definition,
            specs,
        })
    }

    /// Registry key / normalized entity name
    pub fn name(&self) -> &str {
        &self.table_name
    }

    /// Declared fields in order
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.definition.fields
    }

    /// Find a declared field by name
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.definition.get_field(name)
    }

    /// Declared fields paired with their column specs
    pub fn field_specs(&self) -> impl Iterator<Item = (&FieldDefinition, &ColumnSpec)> {
        self.definition.fields.iter().zip(self.specs.iter())
    }

    /// All column names, `id` first
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once("id")
            .chain(self.definition.fields.iter().map(|f| f.name.as_str()))
            .collect()
    }

    /// Columns the backing table is expected to have
    pub fn expected_columns(&self) -> Vec<ColumnInfo> {
        let id = ColumnInfo {
            name: "id".to_string(),
            sql_type: ValueType::Integer.to_sql_type().to_string(),
            not_null: false,
            primary_key: true,
        };

        std::iter::once(id)
            .chain(self.field_specs().map(|(field, spec)| ColumnInfo {
                name: field.name.clone(),
                sql_type: spec.sql_type.to_string(),
                not_null: !spec.nullable,
                primary_key: false,
            }))
            .collect()
    }

    /// Compare introspected columns against the expected layout
    pub fn check_compatible(&self, existing: &[ColumnInfo]) -> Result<()> {
        let expected = self.expected_columns();

        let compatible = expected.len() == existing.len()
            && expected.iter().zip(existing).all(|(e, x)| e.matches(x));

        if compatible {
            return Ok(());
        }

        Err(DatastoreError::schema_conflict(format!(
            "Table '{}' exists with columns [{}] but entity '{}' requires [{}]",
            self.table_name,
            describe_columns(existing),
            self.definition.name,
            describe_columns(&expected)
        )))
    }
}

fn describe_columns(columns: &[ColumnInfo]) -> String {
    columns
        .iter()
        .map(|c| {
            let mut s = format!("{} {}", c.name, c.sql_type);
            if c.not_null {
                s.push_str(" NOT NULL");
            }
            if c.primary_key {
                s.push_str(" PK");
            }
            s
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read a table's columns; empty when the table does not exist
pub async fn introspect_table(
    conn: &mut SqliteConnection,
    table_name: &str,
) -> Result<Vec<ColumnInfo>> {
    tracing::debug!(sql = %TABLE_INFO_QUERY, table = %table_name, "introspect");

    let rows = sqlx::query(TABLE_INFO_QUERY)
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| -> Result<ColumnInfo> {
            Ok(ColumnInfo {
                name: row.try_get(0)?,
                sql_type: row.try_get(1)?,
                not_null: row.try_get::<i64, _>(2)? != 0,
                primary_key: row.try_get::<i64, _>(3)? != 0,
            })
        })
        .collect()
}

/// Ensure the table backing `schema` exists
///
/// Introspects first: a missing table is created, a matching table is left
/// alone, and a mismatching table is a [`DatastoreError::SchemaConflict`].
/// Nothing is ever dropped or altered. Returns whether the table was created.
///
/// The caller must hold the write scope so the introspect-then-create sequence
/// is not interleaved with another synthesis.
pub async fn ensure_table(
    conn: &mut SqliteConnection,
    schema: &RegisteredSchema,
) -> Result<bool> {
    let existing = introspect_table(conn, &schema.table_name).await?;

    if !existing.is_empty() {
        if let Err(e) = schema.check_compatible(&existing) {
            tracing::warn!(table = %schema.table_name, error = %e, "schema conflict");
            return Err(e);
        }
        tracing::debug!(table = %schema.table_name, "table already present");
        return Ok(false);
    }

    let create_sql = DdlGenerator::new(schema).generate_create_table();
    tracing::debug!(sql = %create_sql, "ddl");
    sqlx::query(&create_sql).execute(&mut *conn).await?;

    tracing::info!(table = %schema.table_name, columns = schema.column_names().len(), "created table");
    Ok(true)
}
