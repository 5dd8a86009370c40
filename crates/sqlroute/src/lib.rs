//! SQLRoute - master/slave read-write splitting with clock-based read
//! consistency.
//!
//! SQLRoute sits between application code and a pool of database
//! connections made of one master and several asynchronously replicated
//! slaves. It provides:
//!
//! - Writes routed to the master, with the master's replication position
//!   ("clock") tracked after every write outside a transaction
//! - Reads routed to a random slave by default, or to the master while a
//!   transaction is open or after a write in the same context
//! - Scoped overrides: run a block on the master, on a slave, or on any
//!   connection at least as fresh as a given clock
//! - Pool-wide liveness checks and reconnect/disconnect/reset broadcasts
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlroute::prelude::*;
//!
//! async fn example<D: Driver>(cx: &Cx, driver: &D, config: &RouterConfig) {
//!     let router = match Router::connect(cx, driver, config).await {
//!         Outcome::Ok(router) => router,
//!         _ => return,
//!     };
//!     let ctx = router.context();
//!
//!     // Write on the master; the context's clock now covers it.
//!     router
//!         .update(cx, &ctx, "UPDATE users SET name = ? WHERE id = ?", &[
//!             Value::from("Alice"),
//!             Value::BigInt(1),
//!         ])
//!         .await;
//!
//!     // Hand the clock to another request, which reads at least as fresh.
//!     let token = ctx.clock().unwrap_or_default();
//!     let other = router.context();
//!     router
//!         .with_consistency(cx, &other, Some(&token), async |conn| {
//!             conn.query(cx, "SELECT name FROM users WHERE id = 1", &[]).await
//!         })
//!         .await;
//! }
//! ```
//!
//! # Execution contexts
//!
//! Routing state lives in a [`RouteContext`], one per logical execution
//! context, passed to every call. Two contexts never observe each other's
//! selections or clocks.

pub use sqlroute_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Core types
    BroadcastError,
    Clock,
    ColumnInfo,
    ConfigError,
    ConnectionError,
    ConnectionErrorKind,
    ConnectionHandle,
    Error,
    HandleIdentity,
    MASTER_STATUS_SQL,
    QueryError,
    QueryErrorKind,
    Result,
    Role,
    Row,
    SLAVE_STATUS_SQL,
    TransactionError,
    TransactionErrorKind,
    TypeError,
    Value,
    quote_ident_mysql,
    sanitize_identifier,
};

pub use sqlroute_pool::{
    ConnectionPool, Driver, NodeConfig, ResolvedConfig, RouterConfig, check_adapter, identity_for,
};

pub mod context;
pub mod router;

pub use context::{RouteContext, Selection};
pub use router::Router;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Clock, ConnectionHandle, ConnectionPool, Cx, Driver, Error, NodeConfig, Outcome,
        RouteContext, Router, RouterConfig, Row, Selection, Value,
    };
}
