//! Connection handle abstraction.
//!
//! This module defines the capability the router needs from one physical
//! database connection:
//!
//! - [`ConnectionHandle`] - statement execution, transaction bookkeeping,
//!   savepoints, schema introspection and liveness management
//! - [`Role`] - whether a handle is the primary or a replica
//! - [`HandleIdentity`] - the name/host/port used to tag log output
//!
//! Drivers implement [`ConnectionHandle`] once per database; the router is
//! generic over it and never inspects a driver's internals. All I/O takes a
//! `Cx` context for cancellation, and every method takes `&self` because the
//! pool shares its handles: reconnects and resets act in place.

use std::fmt;
use std::future::Future;

use crate::clock::{Clock, MASTER_STATUS_SQL, SLAVE_STATUS_SQL};
use crate::error::Error;
use crate::identifiers::{quote_ident_mysql, sanitize_identifier};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// The part a handle plays in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single writable connection of record.
    Master,
    /// A read-only connection mirroring the master asynchronously.
    Slave,
}

impl Role {
    /// The role tag used in identities and log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity metadata attached to a handle for diagnostics.
///
/// Renders as `name:host:port`, leaving out the parts that are absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleIdentity {
    /// Role of the handle in its pool
    pub role: Role,
    /// Configured node name, defaulting to the role tag
    pub name: String,
    /// Host the handle is connected to
    pub host: Option<String>,
    /// Port the handle is connected to
    pub port: Option<u16>,
}

impl HandleIdentity {
    /// Identity for a handle with no explicit name.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            name: role.as_str().to_string(),
            host: None,
            port: None,
        }
    }

    /// Override the node name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl fmt::Display for HandleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(host) = &self.host {
            write!(f, ":{}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// One live database connection, as the router sees it.
///
/// Implementations must be `Send + Sync`; the pool owns every handle for the
/// life of the process and lends out shared references.
///
/// The open-transaction counter is bookkeeping owned by the handle. Callers
/// (or the router's transaction helper) bump it around `begin`/`commit`, and
/// the router reads it to decide whether replication positions are
/// meaningful right now.
pub trait ConnectionHandle: Send + Sync {
    /// Identity of this handle (role, name, host, port).
    fn identity(&self) -> &HandleIdentity;

    /// Name of the driver behind this handle, e.g. `"mysql"`.
    fn adapter_name(&self) -> &str;

    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a query bypassing any driver-side result cache.
    ///
    /// Replication-status probes go through here: a cached status row is
    /// worse than none. Drivers without a cache keep the default.
    fn query_one_uncached(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        self.query_one(cx, sql, params)
    }

    /// Execute a statement (UPDATE, DELETE, DDL) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Execute an INSERT and return the last inserted ID.
    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Start a transaction on this connection.
    fn begin_db_transaction(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Commit the current transaction.
    fn commit_db_transaction(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the current transaction.
    fn rollback_db_transaction(&self, cx: &Cx)
    -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Number of transactions currently open on this connection.
    fn open_transactions(&self) -> usize;

    /// Record that a transaction was opened.
    fn increment_open_transactions(&self);

    /// Record that a transaction was closed.
    fn decrement_open_transactions(&self);

    /// Whether the database supports savepoints.
    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Name for the savepoint at the current nesting depth.
    fn current_savepoint_name(&self) -> String {
        format!("sqlroute_sp_{}", self.open_transactions())
    }

    /// Create a savepoint.
    fn create_savepoint(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        let sql = format!("SAVEPOINT {}", sanitize_identifier(name));
        async move { discard_count(self.execute(cx, &sql, &[]).await) }
    }

    /// Roll back to a savepoint.
    fn rollback_to_savepoint(
        &self,
        cx: &Cx,
        name: &str,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", sanitize_identifier(name));
        async move { discard_count(self.execute(cx, &sql, &[]).await) }
    }

    /// Release a savepoint.
    fn release_savepoint(&self, cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        let sql = format!("RELEASE SAVEPOINT {}", sanitize_identifier(name));
        async move { discard_count(self.execute(cx, &sql, &[]).await) }
    }

    /// List the tables of the connected database.
    fn tables(&self, cx: &Cx) -> impl Future<Output = Outcome<Vec<String>, Error>> + Send;

    /// Remove every row of a table.
    fn truncate_table(&self, cx: &Cx, table: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        let sql = format!("TRUNCATE TABLE {}", quote_ident_mysql(table));
        async move { discard_count(self.execute(cx, &sql, &[]).await) }
    }

    /// Check the connection by sending a ping.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Whether the connection answers a ping.
    fn is_active(&self, cx: &Cx) -> impl Future<Output = bool> + Send {
        async {
            match self.ping(cx).await {
                Outcome::Ok(()) => true,
                Outcome::Err(_) | Outcome::Cancelled(_) | Outcome::Panicked(_) => false,
            }
        }
    }

    /// Drop and re-establish the physical connection in place.
    fn reconnect(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Close the physical connection; the handle stays in the pool.
    fn disconnect(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Clear session state (temporary tables, variables, open transactions).
    fn reset(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// The primary's current binlog position, or `None` when binary logging
    /// is off and the status query returns no row.
    fn master_clock(&self, cx: &Cx) -> impl Future<Output = Outcome<Option<Clock>, Error>> + Send {
        async move {
            match self.query_one_uncached(cx, MASTER_STATUS_SQL, &[]).await {
                Outcome::Ok(Some(row)) => match Clock::from_master_status(&row) {
                    Ok(clock) => Outcome::Ok(Some(clock)),
                    Err(e) => Outcome::Err(e),
                },
                Outcome::Ok(None) => Outcome::Ok(None),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// How far this replica has applied the primary's log, or `None` when
    /// the node is not replicating.
    fn slave_clock(&self, cx: &Cx) -> impl Future<Output = Outcome<Option<Clock>, Error>> + Send {
        async move {
            match self.query_one_uncached(cx, SLAVE_STATUS_SQL, &[]).await {
                Outcome::Ok(Some(row)) => match Clock::from_slave_status(&row) {
                    Ok(clock) => Outcome::Ok(Some(clock)),
                    Err(e) => Outcome::Err(e),
                },
                Outcome::Ok(None) => Outcome::Ok(None),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}

fn discard_count(outcome: Outcome<u64, Error>) -> Outcome<(), Error> {
    match outcome {
        Outcome::Ok(_) => Outcome::Ok(()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}
