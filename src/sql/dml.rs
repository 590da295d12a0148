//! DML Generation for registered entities
//!
//! Every DAO statement comes from here. Identifiers are the schema's
//! normalized table name and validated field names, always quoted; values are
//! `?N` placeholders bound by the caller.

use crate::error::{DatastoreError, Result};
use crate::schema::RegisteredSchema;
use crate::sql::sanitize::quote_identifier;

/// DML Generator for one registered entity
pub struct DmlGenerator<'a> {
    schema: &'a RegisteredSchema,
}

impl<'a> DmlGenerator<'a> {
    pub fn new(schema: &'a RegisteredSchema) -> Self {
        Self { schema }
    }

    fn table(&self) -> String {
        quote_identifier(&self.schema.table_name)
    }

    fn select_list(&self) -> String {
        self.schema
            .column_names()
            .into_iter()
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(start: usize, count: usize) -> Vec<String> {
        (start..start + count).map(|i| format!("?{}", i)).collect()
    }

    /// `INSERT` of every declared field; binds fields in declaration order
    pub fn insert(&self) -> String {
        let fields = self.schema.fields();
        if fields.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", self.table());
        }

        let columns: Vec<String> = fields.iter().map(|f| quote_identifier(&f.name)).collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            Self::placeholders(1, fields.len()).join(", ")
        )
    }

    /// `SELECT` one row; binds `id` as `?1`
    pub fn select_by_id(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE \"id\" = ?1",
            self.select_list(),
            self.table()
        )
    }

    /// `SELECT` every row in id order
    pub fn select_all(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY \"id\" ASC",
            self.select_list(),
            self.table()
        )
    }

    /// `SELECT` rows whose field equals `?1`, in id order
    ///
    /// A NULL bound value matches rows where the field is NULL.
    pub fn select_by_field(&self, field: &str) -> Result<String> {
        self.require_field(field)?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {} IS ?1 ORDER BY \"id\" ASC",
            self.select_list(),
            self.table(),
            quote_identifier(field)
        ))
    }

    /// `UPDATE` of every declared field; binds fields in order, then `id`
    ///
    /// `None` when the entity has no fields to set.
    pub fn update_by_id(&self) -> Option<String> {
        let names: Vec<&str> = self.schema.fields().iter().map(|f| f.name.as_str()).collect();
        self.update_fields_unchecked(&names)
    }

    /// `UPDATE` of the named fields only; binds them in the given order, then `id`
    pub fn update_fields(&self, fields: &[&str]) -> Result<Option<String>> {
        for field in fields {
            self.require_field(field)?;
        }
        Ok(self.update_fields_unchecked(fields))
    }

    fn update_fields_unchecked(&self, fields: &[&str]) -> Option<String> {
        if fields.is_empty() {
            return None;
        }

        let set_clauses: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{} = ?{}", quote_identifier(f), i + 1))
            .collect();

        Some(format!(
            "UPDATE {} SET {} WHERE \"id\" = ?{}",
            self.table(),
            set_clauses.join(", "),
            fields.len() + 1
        ))
    }

    /// `DELETE` one row; binds `id` as `?1`
    pub fn delete_by_id(&self) -> String {
        format!("DELETE FROM {} WHERE \"id\" = ?1", self.table())
    }

    /// Row count
    pub fn count(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table())
    }

    fn require_field(&self, field: &str) -> Result<()> {
        if self.schema.field(field).is_none() {
            return Err(DatastoreError::validation(format!(
                "Entity '{}' has no field '{}'",
                self.schema.definition.name, field
            )));
        }
        Ok(())
    }
}
