//! SQL utilities for the Datastore
//!
//! Provides DDL/DML generation and identifier sanitization.

pub mod ddl;
pub mod dml;
pub mod sanitize;

pub use ddl::DdlGenerator;
pub use dml::DmlGenerator;
pub use sanitize::{
    SQLITE_RESERVED_WORDS, normalize_table_name, quote_identifier, validate_identifier,
};
