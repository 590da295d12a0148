//! Generic data-access objects
//!
//! A [`Dao`] is bound to one registered schema and builds every statement from
//! its field list through [`DmlGenerator`]. There is no per-entity code path.
//! [`TypedDao`] layers a host type on top through serde.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection};

use crate::connection::ConnectionManager;
use crate::error::{DatastoreError, Result};
use crate::record::{Entity, Record};
use crate::schema::RegisteredSchema;
use crate::sql::dml::DmlGenerator;
use crate::types::{
    FieldDefinition, Value, ValueType, decode_timestamp, encode_timestamp, timestamp_in_range,
};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Create/read/update/delete for one registered entity
#[derive(Clone)]
pub struct Dao {
    schema: Arc<RegisteredSchema>,
    connections: ConnectionManager,
}

impl Dao {
    pub(crate) fn new(schema: Arc<RegisteredSchema>, connections: ConnectionManager) -> Self {
        Self {
            schema,
            connections,
        }
    }

    /// The schema this DAO operates on
    pub fn schema(&self) -> &RegisteredSchema {
        &self.schema
    }

    fn dml(&self) -> DmlGenerator<'_> {
        DmlGenerator::new(&self.schema)
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Insert a new record and return it with its assigned id
    ///
    /// Absent fields take their default (or NULL when nullable). An id of `0`
    /// counts as unset. Fails with [`DatastoreError::Validation`] if the record
    /// already carries an id, names an unknown field, has a value of the wrong
    /// type, or leaves a required field unset.
    pub async fn create(&self, record: &Record) -> Result<Record> {
        if let Some(id) = record.id.filter(|id| *id != 0) {
            return Err(DatastoreError::validation(format!(
                "Cannot create a record that already has id {}",
                id
            )));
        }

        let values = self.resolve_all(&record.fields)?;
        let sql = self.dml().insert();

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_value(query, value);
        }

        let mut conn = self.connections.write().await?;
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, "create");
        let result = query.execute(&mut *conn).await?;
        drop(conn);

        Ok(self.assemble(result.last_insert_rowid(), values))
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Fetch one record; `None` if no record has this id
    pub async fn read_by_id(&self, id: i64) -> Result<Option<Record>> {
        let mut conn = self.connections.read().await?;
        self.fetch_by_id(&mut conn, id).await
    }

    /// Fetch every record in ascending id order
    pub async fn read_all(&self) -> Result<Vec<Record>> {
        let sql = self.dml().select_all();
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, "read_all");

        let mut conn = self.connections.read().await?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// Fetch records whose `field` equals `value`, in ascending id order
    ///
    /// A null `value` matches records where the field is NULL.
    pub async fn find_by_field(&self, field: &str, value: impl Into<Value>) -> Result<Vec<Record>> {
        let (sql, value) = self.field_lookup(field, value.into())?;
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, "find_by_field");

        let mut conn = self.connections.read().await?;
        let rows = bind_value(sqlx::query(&sql), &value)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// First record (lowest id) whose `field` equals `value`
    pub async fn find_one_by_field(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Record>> {
        let (sql, value) = self.field_lookup(field, value.into())?;
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, "find_one_by_field");

        let mut conn = self.connections.read().await?;
        let row = bind_value(sqlx::query(&sql), &value)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(|r| self.decode_row(r)).transpose()
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<i64> {
        let sql = self.dml().count();
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, "count");

        let mut conn = self.connections.read().await?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
        Ok(count)
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Replace every declared field of an existing record
    ///
    /// Fields absent from `record` are reset to their default (or NULL).
    /// Fails with [`DatastoreError::NotFound`] if no record has the id; nothing
    /// is inserted in that case.
    pub async fn update(&self, record: &Record) -> Result<Record> {
        let id = record.id.ok_or_else(|| {
            DatastoreError::validation("Cannot update a record without an id")
        })?;

        let values = self.resolve_all(&record.fields)?;

        let mut conn = self.connections.write().await?;

        let Some(sql) = self.dml().update_by_id() else {
            // No fields to set; the update reduces to an existence check.
            return match self.fetch_by_id(&mut conn, id).await? {
                Some(existing) => Ok(existing),
                None => Err(self.not_found(id)),
            };
        };

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_value(query, value);
        }
        query = query.bind(id);

        tracing::debug!(sql = %sql, entity = %self.schema.table_name, id, "update");
        let result = query.execute(&mut *conn).await?;

        if result.rows_affected() == 0 {
            return Err(self.not_found(id));
        }

        Ok(self.assemble(id, values))
    }

    /// Update only the given fields of an existing record
    ///
    /// Returns the full record after the change. Fails with
    /// [`DatastoreError::NotFound`] if no record has the id.
    pub async fn patch(&self, id: i64, changes: &BTreeMap<String, Value>) -> Result<Record> {
        let mut names = Vec::with_capacity(changes.len());
        let mut values = Vec::with_capacity(changes.len());
        for (name, value) in changes {
            let field = self.require_field(name)?;
            values.push(check_value(field, value)?);
            names.push(name.as_str());
        }

        let mut conn = self.connections.write().await?;

        if let Some(sql) = self.dml().update_fields(&names)? {
            let mut query = sqlx::query(&sql);
            for value in &values {
                query = bind_value(query, value);
            }
            query = query.bind(id);

            tracing::debug!(sql = %sql, entity = %self.schema.table_name, id, "patch");
            let result = query.execute(&mut *conn).await?;
            if result.rows_affected() == 0 {
                return Err(self.not_found(id));
            }
        }

        self.fetch_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| self.not_found(id))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a record; deleting an absent id succeeds
    ///
    /// Returns whether a record was removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let sql = self.dml().delete_by_id();

        let mut conn = self.connections.write().await?;
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, id, "delete");
        let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn fetch_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Record>> {
        let sql = self.dml().select_by_id();
        tracing::debug!(sql = %sql, entity = %self.schema.table_name, id, "read_by_id");

        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
        row.as_ref().map(|r| self.decode_row(r)).transpose()
    }

    fn field_lookup(&self, field: &str, value: Value) -> Result<(String, Value)> {
        let sql = self.dml().select_by_field(field)?;
        let definition = self.require_field(field)?;

        if !value.conforms_to(definition.value_type) {
            return Err(DatastoreError::validation(format!(
                "Field '{}' expects {}, got {:?}",
                field, definition.value_type, value
            )));
        }

        Ok((sql, value.coerce_to(definition.value_type)))
    }

    fn require_field(&self, name: &str) -> Result<&FieldDefinition> {
        self.schema.field(name).ok_or_else(|| {
            DatastoreError::validation(format!(
                "Entity '{}' has no field '{}'",
                self.schema.definition.name, name
            ))
        })
    }

    /// Resolve a value for every declared field, in declaration order
    fn resolve_all(&self, supplied: &BTreeMap<String, Value>) -> Result<Vec<Value>> {
        for name in supplied.keys() {
            self.require_field(name)?;
        }

        self.schema
            .fields()
            .iter()
            .map(|field| match supplied.get(&field.name) {
                Some(value) => check_value(field, value),
                None => field.fallback().ok_or_else(|| {
                    DatastoreError::validation(format!(
                        "Required field '{}' is missing",
                        field.name
                    ))
                }),
            })
            .collect()
    }

    fn assemble(&self, id: i64, values: Vec<Value>) -> Record {
        let fields = self
            .schema
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .zip(values)
            .collect();
        Record {
            id: Some(id),
            fields,
        }
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<Record> {
        let id: i64 = row.try_get(0)?;

        let mut fields = BTreeMap::new();
        for (i, field) in self.schema.fields().iter().enumerate() {
            let value = decode_column(row, i + 1, field)?;
            fields.insert(field.name.clone(), value);
        }

        Ok(Record {
            id: Some(id),
            fields,
        })
    }

    fn not_found(&self, id: i64) -> DatastoreError {
        DatastoreError::not_found(format!(
            "No '{}' record with id {}",
            self.schema.definition.name, id
        ))
    }
}

/// Type-check a supplied value against its field
fn check_value(field: &FieldDefinition, value: &Value) -> Result<Value> {
    if value.is_null() {
        if !field.nullable {
            return Err(DatastoreError::validation(format!(
                "Field '{}' does not allow NULL values",
                field.name
            )));
        }
        return Ok(Value::Null);
    }

    if !value.conforms_to(field.value_type) {
        return Err(DatastoreError::validation(format!(
            "Field '{}' expects {}, got {:?}",
            field.name, field.value_type, value
        )));
    }

    match value {
        Value::Real(f) if !f.is_finite() => {
            return Err(DatastoreError::validation(format!(
                "Field '{}' cannot store non-finite number {}",
                field.name, f
            )));
        }
        Value::Timestamp(ts) if !timestamp_in_range(ts) => {
            return Err(DatastoreError::validation(format!(
                "Field '{}' cannot store timestamp {} outside years 0000-9999",
                field.name,
                encode_timestamp(ts)
            )));
        }
        _ => {}
    }

    Ok(value.clone().coerce_to(field.value_type))
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Boolean(b) => query.bind(i64::from(*b)),
        Value::Timestamp(ts) => query.bind(encode_timestamp(ts)),
    }
}

fn decode_column(row: &SqliteRow, index: usize, field: &FieldDefinition) -> Result<Value> {
    let value = match field.value_type {
        ValueType::Integer => row.try_get::<Option<i64>, _>(index)?.map(Value::Integer),
        ValueType::Real => row.try_get::<Option<f64>, _>(index)?.map(Value::Real),
        ValueType::Text => row.try_get::<Option<String>, _>(index)?.map(Value::Text),
        ValueType::Boolean => match row.try_get::<Option<i64>, _>(index)? {
            None => None,
            Some(0) => Some(Value::Boolean(false)),
            Some(1) => Some(Value::Boolean(true)),
            Some(other) => {
                return Err(DatastoreError::database(format!(
                    "Field '{}' holds {} where a boolean was expected",
                    field.name, other
                )));
            }
        },
        ValueType::Timestamp => match row.try_get::<Option<String>, _>(index)? {
            None => None,
            Some(raw) => Some(Value::Timestamp(decode_timestamp(&raw).map_err(|e| {
                DatastoreError::database(format!(
                    "Field '{}' holds unreadable timestamp '{}': {}",
                    field.name, raw, e
                ))
            })?)),
        },
    };

    Ok(value.unwrap_or(Value::Null))
}

// ============================================================================
// Typed DAO
// ============================================================================

/// DAO over a host type implementing [`Entity`]
pub struct TypedDao<E> {
    inner: Dao,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for TypedDao<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> TypedDao<E> {
    pub(crate) fn new(inner: Dao) -> Self {
        Self {
            inner,
            _entity: PhantomData,
        }
    }

    /// The underlying record-level DAO
    pub fn records(&self) -> &Dao {
        &self.inner
    }

    pub async fn create(&self, entity: &E) -> Result<E> {
        let record = self.to_record(entity)?;
        Self::from_record(self.inner.create(&record).await?)
    }

    pub async fn read_by_id(&self, id: i64) -> Result<Option<E>> {
        self.inner
            .read_by_id(id)
            .await?
            .map(Self::from_record)
            .transpose()
    }

    pub async fn read_all(&self) -> Result<Vec<E>> {
        self.inner
            .read_all()
            .await?
            .into_iter()
            .map(Self::from_record)
            .collect()
    }

    pub async fn update(&self, entity: &E) -> Result<E> {
        let record = self.to_record(entity)?;
        Self::from_record(self.inner.update(&record).await?)
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        self.inner.delete(id).await
    }

    pub async fn find_by_field(&self, field: &str, value: impl Into<Value>) -> Result<Vec<E>> {
        self.inner
            .find_by_field(field, value)
            .await?
            .into_iter()
            .map(Self::from_record)
            .collect()
    }

    pub async fn find_one_by_field(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<E>> {
        self.inner
            .find_one_by_field(field, value)
            .await?
            .map(Self::from_record)
            .transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        self.inner.count().await
    }

    fn to_record(&self, entity: &E) -> Result<Record> {
        let json = serde_json::to_value(entity)?;
        Record::from_json(self.inner.schema(), &json)
    }

    fn from_record(record: Record) -> Result<E> {
        Ok(serde_json::from_value(record.to_json())?)
    }
}
