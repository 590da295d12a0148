//! SQL Identifier Sanitization Utilities
//!
//! Entity names are normalized into table names and field names are validated
//! before either is ever interpolated into SQL text. Values are never
//! interpolated; they are bound.

use std::sync::LazyLock;

use regex::Regex;

/// SQLite keywords rejected as table or column names
///
/// The full set reported by `sqlite3_keyword_name`.
pub const SQLITE_RESERVED_WORDS: &[&str] = &[
    "ABORT",
    "ACTION",
    "ADD",
    "AFTER",
    "ALL",
    "ALTER",
    "ALWAYS",
    "ANALYZE",
    "AND",
    "AS",
    "ASC",
    "ATTACH",
    "AUTOINCREMENT",
    "BEFORE",
    "BEGIN",
    "BETWEEN",
    "BY",
    "CASCADE",
    "CASE",
    "CAST",
    "CHECK",
    "COLLATE",
    "COLUMN",
    "COMMIT",
    "CONFLICT",
    "CONSTRAINT",
    "CREATE",
    "CROSS",
    "CURRENT",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "DATABASE",
    "DEFAULT",
    "DEFERRABLE",
    "DEFERRED",
    "DELETE",
    "DESC",
    "DETACH",
    "DISTINCT",
    "DO",
    "DROP",
    "EACH",
    "ELSE",
    "END",
    "ESCAPE",
    "EXCEPT",
    "EXCLUDE",
    "EXCLUSIVE",
    "EXISTS",
    "EXPLAIN",
    "FAIL",
    "FILTER",
    "FIRST",
    "FOLLOWING",
    "FOR",
    "FOREIGN",
    "FROM",
    "FULL",
    "GENERATED",
    "GLOB",
    "GROUP",
    "GROUPS",
    "HAVING",
    "IF",
    "IGNORE",
    "IMMEDIATE",
    "IN",
    "INDEX",
    "INDEXED",
    "INITIALLY",
    "INNER",
    "INSERT",
    "INSTEAD",
    "INTERSECT",
    "INTO",
    "IS",
    "ISNULL",
    "JOIN",
    "KEY",
    "LAST",
    "LEFT",
    "LIKE",
    "LIMIT",
    "MATCH",
    "MATERIALIZED",
    "NATURAL",
    "NO",
    "NOT",
    "NOTHING",
    "NOTNULL",
    "NULL",
    "NULLS",
    "OF",
    "OFFSET",
    "ON",
    "OR",
    "ORDER",
    "OTHERS",
    "OUTER",
    "OVER",
    "PARTITION",
    "PLAN",
    "PRAGMA",
    "PRECEDING",
    "PRIMARY",
    "QUERY",
    "RAISE",
    "RANGE",
    "RECURSIVE",
    "REFERENCES",
    "REGEXP",
    "REINDEX",
    "RELEASE",
    "RENAME",
    "REPLACE",
    "RESTRICT",
    "RETURNING",
    "RIGHT",
    "ROLLBACK",
    "ROW",
    "ROWS",
    "SAVEPOINT",
    "SELECT",
    "SET",
    "TABLE",
    "TEMP",
    "TEMPORARY",
    "THEN",
    "TIES",
    "TO",
    "TRANSACTION",
    "TRIGGER",
    "UNBOUNDED",
    "UNION",
    "UNIQUE",
    "UPDATE",
    "USING",
    "VACUUM",
    "VALUES",
    "VIEW",
    "VIRTUAL",
    "WHEN",
    "WHERE",
    "WINDOW",
    "WITH",
    "WITHOUT",
];

/// Column names the store manages itself
pub const RESERVED_COLUMNS: &[&str] = &["id", "rowid", "oid", "_rowid_"];

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*$").expect("identifier pattern is valid")
});

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use saas_datastore::sql::quote_identifier;
///
/// let quoted = quote_identifier("my_table");
/// assert_eq!(quoted, "\"my_table\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    // Escape any double quotes in the identifier by doubling them
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn is_reserved_word(name: &str) -> bool {
    SQLITE_RESERVED_WORDS.contains(&name.to_uppercase().as_str())
}

/// Derive a table name from an entity name
///
/// Lowercases and maps every non-alphanumeric character to `_`. Rejects names
/// that normalize to nothing but underscores, to a reserved word, or into
/// SQLite's internal `sqlite_` namespace.
///
/// # Example
/// ```
/// use saas_datastore::sql::normalize_table_name;
///
/// assert_eq!(normalize_table_name("Billing-Plan").unwrap(), "billing_plan");
/// assert!(normalize_table_name("---").is_err());
/// assert!(normalize_table_name("Select").is_err());
/// ```
pub fn normalize_table_name(entity_name: &str) -> Result<String, String> {
    let normalized: String = entity_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if normalized.chars().all(|c| c == '_') {
        return Err(format!(
            "Entity name '{}' normalizes to an empty table name",
            entity_name
        ));
    }

    if is_reserved_word(&normalized) {
        return Err(format!(
            "Entity name '{}' normalizes to the reserved word '{}'",
            entity_name, normalized
        ));
    }

    if normalized.starts_with("sqlite_") {
        return Err(format!(
            "Entity name '{}' falls in the reserved sqlite_ namespace",
            entity_name
        ));
    }

    Ok(normalized)
}

/// Validate a field (column) name
///
/// Rules:
/// - Must start with a letter (a-z)
/// - Can only contain lowercase letters, numbers, and underscores
/// - Cannot be an SQLite reserved word
/// - Cannot be one of the store-managed columns (`id`, rowid aliases)
///
/// # Example
/// ```
/// use saas_datastore::sql::validate_identifier;
///
/// assert!(validate_identifier("email").is_ok());
/// assert!(validate_identifier("select").is_err()); // reserved keyword
/// assert!(validate_identifier("id").is_err()); // managed column
/// ```
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        ));
    }

    if is_reserved_word(name) {
        return Err(format!(
            "Identifier '{}' is an SQLite reserved keyword and cannot be used.",
            name
        ));
    }

    if RESERVED_COLUMNS.contains(&name) {
        return Err(format!(
            "Column name '{}' is managed by the store and cannot be declared.",
            name
        ));
    }

    Ok(())
}
