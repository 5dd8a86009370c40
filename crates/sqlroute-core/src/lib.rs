//! Core types and traits for replication-aware connection routing.
//!
//! This crate provides the leaf abstractions the router is built on:
//!
//! - [`Clock`] - a comparable replication log position
//! - [`ConnectionHandle`] - the capability a driver exposes per connection
//! - [`Role`] and [`HandleIdentity`] - what a handle is and how it is named
//! - [`Value`] and [`Row`] - statement parameters and results
//! - [`Error`] - the error taxonomy shared by every crate
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct I/O

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod clock;
pub mod connection;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod value;

pub use clock::{Clock, MASTER_STATUS_SQL, SLAVE_STATUS_SQL};
pub use connection::{ConnectionHandle, HandleIdentity, Role};
pub use error::{
    BroadcastError, ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError,
    QueryErrorKind, Result, TransactionError, TransactionErrorKind, TypeError,
};
pub use identifiers::{quote_ident_mysql, sanitize_identifier};
pub use row::{ColumnInfo, Row};
pub use value::Value;
