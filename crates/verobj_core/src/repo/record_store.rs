//! Record store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD by primary key over one versioned object table.
//! - Map JSON data payloads onto the table's data columns.
//! - Stamp audit columns (`created_*`, `updated_*`).
//!
//! # Invariants
//! - Only columns listed in the table's `TableSchema` are writable as data.
//! - Update/delete of a missing row is `RowNotFound`, never a silent no-op.
//! - Read paths reject invalid persisted state instead of masking it.
//!
//! The store knows nothing about object numbering or the latest-row rule;
//! those live in the service layer.

use crate::db::DbError;
use crate::model::key::{KeyValidationError, ObjectNumber, RepositoryId, VersionedObjectKey};
use crate::model::row::{DataMap, SystemColumns, VersionedObjectRow};
use crate::repo::schema_check::ensure_table_ready;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt::{Display, Formatter};

const KEY_COLUMNS: [&str; 3] = ["repository_id", "is_latest", "object_number"];
const SYSTEM_COLUMNS: [&str; 4] = ["created_by", "created_at", "updated_by", "updated_at"];
const KEY_PREDICATE: &str = "repository_id = ? AND is_latest = ? AND object_number = ?";
const NOW_MS_SQL: &str = "(strftime('%s', 'now') * 1000)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by the record store and numbering repository.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Validation(KeyValidationError),
    /// No counter row exists for the repository.
    CounterNotFound(RepositoryId),
    /// The object number was never allocated in the repository.
    AllocationNotFound {
        repository_id: RepositoryId,
        object_number: ObjectNumber,
    },
    /// The allocation row already exists; a concurrent or stale allocation won.
    AllocationConflict {
        repository_id: RepositoryId,
        object_number: ObjectNumber,
        source: DbError,
    },
    /// No data row matches the primary key.
    RowNotFound(VersionedObjectKey),
    /// Field is not a writable data column of the table.
    InvalidField {
        table: &'static str,
        field: String,
    },
    /// Update carried no data columns.
    EmptyChanges,
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Returns whether the error reports a missing counter, allocation or row.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CounterNotFound(_) | Self::AllocationNotFound { .. } | Self::RowNotFound(_)
        )
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::CounterNotFound(repository_id) => {
                write!(f, "object number counter not found for repository {repository_id}")
            }
            Self::AllocationNotFound {
                repository_id,
                object_number,
            } => write!(
                f,
                "object number {object_number} not found in repository {repository_id}"
            ),
            Self::AllocationConflict {
                repository_id,
                object_number,
                source,
            } => write!(
                f,
                "object number {object_number} already allocated in repository {repository_id}: {source}"
            ),
            Self::RowNotFound(key) => write!(f, "object row not found: {key}"),
            Self::InvalidField { table, field } => {
                write!(f, "`{field}` is not a data column of table `{table}`")
            }
            Self::EmptyChanges => write!(f, "update requires at least one data column"),
            Self::InvalidData(message) => write!(f, "invalid persisted object data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::AllocationConflict { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<KeyValidationError> for RepoError {
    fn from(value: KeyValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Static description of one versioned object table.
///
/// The table must carry the key columns `repository_id`, `is_latest`,
/// `object_number` and the audit columns `created_by`, `created_at`,
/// `updated_by`, `updated_at` next to the listed data columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: &'static str,
    pub data_columns: &'static [&'static str],
}

/// Built-in `objects` table created by the bundled migrations.
pub const OBJECTS_TABLE: TableSchema = TableSchema {
    table_name: "objects",
    data_columns: &["name", "description", "payload"],
};

/// Generic CRUD over one versioned object table, run inside a caller context.
pub trait RecordStore {
    /// Loads one row by full primary key.
    fn find(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
    ) -> RepoResult<Option<VersionedObjectRow>>;
    /// Inserts one row and returns it as persisted.
    fn create(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
        data: &DataMap,
        actor: Option<&str>,
    ) -> RepoResult<VersionedObjectRow>;
    /// Overwrites the given data columns of one row and returns it.
    fn update(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
        changes: &DataMap,
        actor: Option<&str>,
    ) -> RepoResult<VersionedObjectRow>;
    /// Hard-deletes one row.
    fn delete(&self, ctx: &Connection, key: &VersionedObjectKey) -> RepoResult<()>;
}

/// SQLite-backed record store for one table.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    schema: TableSchema,
    select_sql: String,
}

impl SqliteRecordStore {
    /// Builds a store after checking `ctx` carries the migrated table.
    pub fn try_new(ctx: &Connection, schema: TableSchema) -> RepoResult<Self> {
        let required = KEY_COLUMNS
            .iter()
            .chain(schema.data_columns.iter())
            .chain(SYSTEM_COLUMNS.iter())
            .copied();
        ensure_table_ready(ctx, schema.table_name, required)?;

        let select_sql = format!(
            "SELECT {} FROM {} WHERE {KEY_PREDICATE};",
            KEY_COLUMNS
                .iter()
                .chain(schema.data_columns.iter())
                .chain(SYSTEM_COLUMNS.iter())
                .copied()
                .collect::<Vec<_>>()
                .join(", "),
            schema.table_name
        );

        Ok(Self { schema, select_sql })
    }

    /// Returns the table description this store writes to.
    pub fn schema(&self) -> TableSchema {
        self.schema
    }

    fn check_fields(&self, data: &DataMap) -> RepoResult<()> {
        for field in data.keys() {
            if !self.schema.data_columns.contains(&field.as_str()) {
                return Err(RepoError::InvalidField {
                    table: self.schema.table_name,
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    /// Data columns present in `data`, in schema order.
    fn present_columns<'a>(
        &self,
        data: &'a DataMap,
    ) -> impl Iterator<Item = (&'static str, &'a JsonValue)> {
        let columns: &'static [&'static str] = self.schema.data_columns;
        columns
            .iter()
            .filter_map(move |column| data.get(*column).map(|value| (*column, value)))
    }

    fn load_required_row(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
    ) -> RepoResult<VersionedObjectRow> {
        self.find(ctx, key)?
            .ok_or_else(|| RepoError::RowNotFound(key.clone()))
    }
}

impl RecordStore for SqliteRecordStore {
    fn find(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
    ) -> RepoResult<Option<VersionedObjectRow>> {
        let mut stmt = ctx.prepare_cached(&self.select_sql)?;
        let mut rows = stmt.query(params_from_iter(key_values(key)))?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_object_row(row, &self.schema)?));
        }
        Ok(None)
    }

    fn create(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
        data: &DataMap,
        actor: Option<&str>,
    ) -> RepoResult<VersionedObjectRow> {
        self.check_fields(data)?;

        let mut columns: Vec<&str> = KEY_COLUMNS.to_vec();
        let mut bind_values = key_values(key);
        for (column, value) in self.present_columns(data) {
            columns.push(column);
            bind_values.push(json_to_sql(value));
        }
        columns.extend(["created_by", "updated_by"]);
        bind_values.push(actor_value(actor));
        bind_values.push(actor_value(actor));

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders});",
            self.schema.table_name,
            columns.join(", ")
        );
        ctx.execute(&sql, params_from_iter(bind_values))?;

        self.load_required_row(ctx, key)
    }

    fn update(
        &self,
        ctx: &Connection,
        key: &VersionedObjectKey,
        changes: &DataMap,
        actor: Option<&str>,
    ) -> RepoResult<VersionedObjectRow> {
        self.check_fields(changes)?;
        if changes.is_empty() {
            return Err(RepoError::EmptyChanges);
        }

        let mut assignments = Vec::new();
        let mut bind_values = Vec::new();
        for (column, value) in self.present_columns(changes) {
            assignments.push(format!("{column} = ?"));
            bind_values.push(json_to_sql(value));
        }
        assignments.push("updated_by = ?".to_string());
        bind_values.push(actor_value(actor));
        assignments.push(format!("updated_at = {NOW_MS_SQL}"));
        bind_values.extend(key_values(key));

        let sql = format!(
            "UPDATE {} SET {} WHERE {KEY_PREDICATE};",
            self.schema.table_name,
            assignments.join(", ")
        );
        let changed = ctx.execute(&sql, params_from_iter(bind_values))?;
        if changed == 0 {
            return Err(RepoError::RowNotFound(key.clone()));
        }

        self.load_required_row(ctx, key)
    }

    fn delete(&self, ctx: &Connection, key: &VersionedObjectKey) -> RepoResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {KEY_PREDICATE};",
            self.schema.table_name
        );
        let changed = ctx.execute(&sql, params_from_iter(key_values(key)))?;
        if changed == 0 {
            return Err(RepoError::RowNotFound(key.clone()));
        }
        Ok(())
    }
}

fn key_values(key: &VersionedObjectKey) -> Vec<Value> {
    vec![
        Value::Text(key.repository_id.clone()),
        Value::Integer(bool_to_int(key.is_latest)),
        Value::Integer(key.object_number),
    ]
}

fn actor_value(actor: Option<&str>) -> Value {
    actor.map_or(Value::Null, |actor| Value::Text(actor.to_string()))
}

/// Nested arrays/objects are stored as JSON text and read back as strings.
fn json_to_sql(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(flag) => Value::Integer(bool_to_int(*flag)),
        JsonValue::Number(number) => match number.as_i64() {
            Some(int) => Value::Integer(int),
            None => Value::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(text) => Value::Text(text.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>, column: &str) -> RepoResult<JsonValue> {
    match value {
        ValueRef::Null => Ok(JsonValue::Null),
        ValueRef::Integer(int) => Ok(JsonValue::from(int)),
        ValueRef::Real(real) => serde_json::Number::from_f64(real)
            .map(JsonValue::Number)
            .ok_or_else(|| {
                RepoError::InvalidData(format!("non-finite real `{real}` in column `{column}`"))
            }),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| JsonValue::String(text.to_string()))
            .map_err(|_| RepoError::InvalidData(format!("invalid UTF-8 text in column `{column}`"))),
        ValueRef::Blob(_) => Err(RepoError::InvalidData(format!(
            "unexpected blob in column `{column}`"
        ))),
    }
}

fn parse_object_row(row: &Row<'_>, schema: &TableSchema) -> RepoResult<VersionedObjectRow> {
    let is_latest = match row.get::<_, i64>("is_latest")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_latest value `{other}` in {}.is_latest",
                schema.table_name
            )));
        }
    };

    let key = VersionedObjectKey {
        repository_id: row.get("repository_id")?,
        is_latest,
        object_number: row.get("object_number")?,
    };

    let mut data = DataMap::new();
    for column in schema.data_columns {
        let value = sql_to_json(row.get_ref(*column)?, column)?;
        if !value.is_null() {
            data.insert((*column).to_string(), value);
        }
    }

    Ok(VersionedObjectRow {
        key,
        data,
        system: SystemColumns {
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_by: row.get("updated_by")?,
            updated_at: row.get("updated_at")?,
        },
    })
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
