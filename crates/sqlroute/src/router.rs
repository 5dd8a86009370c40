//! The master/slave router.
//!
//! [`Router`] decides which pooled handle each operation runs on:
//!
//! - scoped operations ([`with_master`](Router::with_master),
//!   [`with_slave`](Router::with_slave),
//!   [`with_consistency`](Router::with_consistency)) select a handle for the
//!   duration of a caller-supplied unit of work
//! - writes always run on the master, then refresh the context's tracked
//!   clock and leave the master selected so later reads see the write
//! - unscoped reads go to the master while a transaction is open, else to
//!   the context's current selection (a random slave by default)
//! - transaction control, savepoints and schema statements go to the
//!   master unconditionally
//!
//! Routing decisions never fail on their own. Staleness falls back to the
//! master; only a missing consistency clock is rejected. Driver failures
//! are returned as-is, with no retries.

use sqlroute_core::{
    Clock, ConnectionHandle, Cx, Error, Outcome, Result, Row, TransactionError,
    TransactionErrorKind, Value,
};
use sqlroute_pool::{ConnectionPool, Driver, RouterConfig};

use crate::context::{RouteContext, Selection};

/// Routes statements between one master and its slaves.
pub struct Router<H> {
    pool: ConnectionPool<H>,
}

/// Decrements the master's open-transaction count on drop.
///
/// A guard dropped without [`finish`](Self::finish) belongs to a
/// transaction whose future was dropped mid-body. `Drop` cannot issue the
/// rollback, so the database transaction stays open on the master
/// connection until the driver discards it (on `reset` or `reconnect`).
struct OpenTransaction<'a, H: ConnectionHandle> {
    handle: &'a H,
    finished: bool,
}

impl<'a, H: ConnectionHandle> OpenTransaction<'a, H> {
    fn begin(handle: &'a H) -> Self {
        handle.increment_open_transactions();
        Self {
            handle,
            finished: false,
        }
    }

    /// The body ran to completion; commit or rollback follows.
    fn finish(mut self) {
        self.finished = true;
    }
}

impl<H: ConnectionHandle> Drop for OpenTransaction<'_, H> {
    fn drop(&mut self) {
        self.handle.decrement_open_transactions();
        if !self.finished {
            tracing::warn!(
                connection = %self.handle.identity(),
                "Transaction dropped before commit or rollback; it stays open until the connection is reset"
            );
        }
    }
}

impl<H: ConnectionHandle> Router<H> {
    /// Route over an existing pool.
    pub fn new(pool: ConnectionPool<H>) -> Self {
        Self { pool }
    }

    /// Open a pool from `config` with `driver` and route over it.
    pub async fn connect<D>(cx: &Cx, driver: &D, config: &RouterConfig) -> Outcome<Self, Error>
    where
        D: Driver<Handle = H>,
    {
        match ConnectionPool::connect(cx, driver, config).await {
            Outcome::Ok(pool) => Outcome::Ok(Self::new(pool)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// A fresh routing context for one execution context.
    pub fn context(&self) -> RouteContext {
        RouteContext::new()
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool<H> {
        &self.pool
    }

    /// The master handle.
    pub fn primary(&self) -> &H {
        self.pool.primary()
    }

    /// The handle behind `selection`.
    ///
    /// A slave index this pool does not have (a context carried over from a
    /// router with more slaves) resolves to the master.
    pub fn handle(&self, selection: Selection) -> &H {
        match selection {
            Selection::Master => self.pool.primary(),
            Selection::Slave(index) => self
                .pool
                .replica(index)
                .unwrap_or_else(|| self.pool.primary()),
        }
    }

    /// The handle an unscoped read would use right now, ignoring open
    /// transactions: the innermost selection, else a random slave.
    pub fn current_connection(&self, ctx: &RouteContext) -> &H {
        match ctx.current() {
            Some(selection) => self.handle(selection),
            None => self.pool.pick_replica(),
        }
    }

    /// Whether the master has a transaction open.
    pub fn open_transaction(&self) -> bool {
        self.pool.primary().open_transactions() > 0
    }

    // ==================== Scoped operations ====================

    /// Run `op` on the master.
    pub async fn with_master<T, F>(&self, ctx: &RouteContext, op: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&H) -> Outcome<T, Error>,
    {
        self.with(ctx, Selection::Master, op).await
    }

    /// Run `op` on a randomly chosen slave.
    pub async fn with_slave<T, F>(&self, ctx: &RouteContext, op: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&H) -> Outcome<T, Error>,
    {
        let slave = Selection::Slave(self.pool.pick_replica_index());
        self.with(ctx, slave, op).await
    }

    /// Run `op` on a connection at least as fresh as `clock`.
    ///
    /// A random slave is drawn and its replication position queried. If no
    /// transaction is open and that slave has applied the log up to `clock`,
    /// `op` runs there; otherwise it runs on the master, which is always
    /// fresh enough.
    ///
    /// Returns `op`'s value together with the clock the caller should carry
    /// forward: the context's tracked clock if set, else `clock`.
    ///
    /// Fails with [`Error::InvalidArgument`] when `clock` is `None`.
    pub async fn with_consistency<T, F>(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        clock: Option<&Clock>,
        op: F,
    ) -> Outcome<(T, Clock), Error>
    where
        F: AsyncFnOnce(&H) -> Outcome<T, Error>,
    {
        let Some(required) = clock else {
            return Outcome::Err(Error::invalid_argument("consistency cannot be nil"));
        };

        let index = self.pool.pick_replica_index();
        let selection = if self.open_transaction() {
            Selection::Master
        } else {
            let slave = self.handle(Selection::Slave(index));
            match slave.slave_clock(cx).await {
                Outcome::Ok(Some(observed)) if observed >= *required => Selection::Slave(index),
                Outcome::Ok(observed) => {
                    tracing::debug!(
                        connection = %slave.identity(),
                        observed = ?observed.map(|c| c.to_string()),
                        required = %required,
                        "Slave behind required clock, using master"
                    );
                    Selection::Master
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        };

        let value = match self.with(ctx, selection, op).await {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        Outcome::Ok((value, ctx.clock().unwrap_or_else(|| required.clone())))
    }

    /// Push `selection`, run `op` on its handle, pop on every exit path.
    async fn with<T, F>(&self, ctx: &RouteContext, selection: Selection, op: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&H) -> Outcome<T, Error>,
    {
        let handle = self.handle(selection);
        let scope = ctx.push(selection);
        tracing::debug!(
            role = selection.role(),
            connection = %handle.identity(),
            depth = scope.depth(),
            "Selected connection"
        );
        let outcome = op(handle).await;
        drop(scope);
        outcome
    }

    // ==================== Write path ====================

    /// Run a mutation on the master, then refresh the tracked clock.
    ///
    /// Outside a transaction the master's binlog position is read right
    /// after `op`, the context's clock advances to it (never backwards), and
    /// the master replaces the context's current selection so the next
    /// unscoped read sees the write. Inside a transaction the position is
    /// meaningless and nothing is refreshed; the eventual commit does it.
    #[tracing::instrument(level = "debug", skip_all)]
    async fn on_write<T, F>(&self, cx: &Cx, ctx: &RouteContext, op: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&H) -> Outcome<T, Error>,
    {
        let value = match self.with(ctx, Selection::Master, op).await {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        if !self.open_transaction() {
            tracing::debug!("update_clock");
            match self.primary().master_clock(cx).await {
                Outcome::Ok(Some(fresh)) => {
                    let previous = ctx.clock();
                    let to = fresh.to_string();
                    if ctx.advance_clock(fresh) {
                        tracing::info!(
                            from = ?previous.map(|c| c.to_string()),
                            to = %to,
                            "Clock updated"
                        );
                    }
                }
                Outcome::Ok(None) => {
                    tracing::debug!("Master reports no binlog position, clock unchanged");
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            // keep using master after write
            ctx.replace_current(Selection::Master);
        }

        Outcome::Ok(value)
    }

    /// Execute an INSERT on the master and return the last inserted ID.
    pub async fn insert(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<i64, Error> {
        self.on_write(cx, ctx, async |conn: &H| {
            tracing::trace!(connection = %conn.identity(), sql, "Routed insert");
            conn.insert(cx, sql, params).await
        })
        .await
    }

    /// Execute an UPDATE on the master and return rows affected.
    pub async fn update(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<u64, Error> {
        self.on_write(cx, ctx, async |conn: &H| {
            tracing::trace!(connection = %conn.identity(), sql, "Routed update");
            conn.execute(cx, sql, params).await
        })
        .await
    }

    /// Execute a DELETE on the master and return rows affected.
    pub async fn delete(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<u64, Error> {
        self.on_write(cx, ctx, async |conn: &H| {
            tracing::trace!(connection = %conn.identity(), sql, "Routed delete");
            conn.execute(cx, sql, params).await
        })
        .await
    }

    /// Commit the master's transaction through the write path.
    pub async fn commit_db_transaction(&self, cx: &Cx, ctx: &RouteContext) -> Outcome<(), Error> {
        self.on_write(cx, ctx, async |conn: &H| conn.commit_db_transaction(cx).await)
            .await
    }

    /// Run `op` on the master inside a transaction.
    ///
    /// With no transaction open this begins one, runs `op`, and commits
    /// through the write path when `op` succeeds (refreshing the clock) or
    /// rolls back when it does not. A failed commit is also rolled back and
    /// its error returned. With a transaction already open, `op` joins it.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future while `op` is pending restores the
    /// routing scope and the open-transaction count, but sends no
    /// `ROLLBACK`: there is no async drop. The master connection still holds
    /// the transaction until the driver discards it, so callers that may
    /// abandon this future should `reset` or `reconnect` the master
    /// afterwards.
    pub async fn transaction<T, F>(&self, cx: &Cx, ctx: &RouteContext, op: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&H) -> Outcome<T, Error>,
    {
        if self.open_transaction() {
            return self.with(ctx, Selection::Master, op).await;
        }

        let primary = self.primary();
        match primary.begin_db_transaction(cx).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let open = OpenTransaction::begin(primary);

        let outcome = self.with(ctx, Selection::Master, op).await;
        open.finish();

        match outcome {
            Outcome::Ok(value) => match self.commit_db_transaction(cx, ctx).await {
                Outcome::Ok(()) => Outcome::Ok(value),
                Outcome::Err(e) => {
                    tracing::debug!(
                        connection = %primary.identity(),
                        error = %e,
                        "Commit failed, rolling back"
                    );
                    self.rollback_after_failure(cx, "commit").await;
                    Outcome::Err(e)
                }
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            failed => {
                self.rollback_after_failure(cx, "transaction body").await;
                failed
            }
        }
    }

    /// Roll the master back after `what` failed. A rollback failure is only
    /// logged; the caller returns the original failure.
    async fn rollback_after_failure(&self, cx: &Cx, what: &'static str) {
        let primary = self.primary();
        if let Outcome::Err(e) = primary.rollback_db_transaction(cx).await {
            tracing::warn!(
                connection = %primary.identity(),
                failed = what,
                error = %e,
                "Rollback after failure also failed"
            );
        }
    }

    // ==================== Read path ====================

    /// The handle unscoped reads use: the master while a transaction is
    /// open, else the current selection.
    pub fn connection_for_read(&self, ctx: &RouteContext) -> &H {
        if self.open_transaction() {
            self.pool.primary()
        } else {
            self.current_connection(ctx)
        }
    }

    /// Run a query and return all rows.
    pub async fn select_all(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Row>, Error> {
        let conn = self.connection_for_read(ctx);
        tracing::trace!(connection = %conn.identity(), sql, "Routed read");
        conn.query(cx, sql, params).await
    }

    /// Run a query and return the first row, if any.
    pub async fn select_one(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Row>, Error> {
        let conn = self.connection_for_read(ctx);
        tracing::trace!(connection = %conn.identity(), sql, "Routed read");
        conn.query_one(cx, sql, params).await
    }

    /// Run a query and return each row's values.
    pub async fn select_rows(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Vec<Value>>, Error> {
        match self.select_all(cx, ctx, sql, params).await {
            Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().map(Row::into_values).collect()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a query and return the first column of the first row.
    pub async fn select_value(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Option<Value>, Error> {
        match self.select_one(cx, ctx, sql, params).await {
            Outcome::Ok(row) => {
                Outcome::Ok(row.and_then(|row| row.into_values().into_iter().next()))
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Run a query and return the first column of every row.
    pub async fn select_values(
        &self,
        cx: &Cx,
        ctx: &RouteContext,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Value>, Error> {
        match self.select_all(cx, ctx, sql, params).await {
            Outcome::Ok(rows) => Outcome::Ok(
                rows.into_iter()
                    .filter_map(|row| row.into_values().into_iter().next())
                    .collect(),
            ),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    // ==================== Master-only passthrough ====================

    /// Name of the driver behind the master.
    pub fn adapter_name(&self) -> &str {
        self.primary().adapter_name()
    }

    /// Whether the master supports savepoints.
    pub fn supports_savepoints(&self) -> bool {
        self.primary().supports_savepoints()
    }

    /// Transactions open on the master.
    pub fn open_transactions(&self) -> usize {
        self.primary().open_transactions()
    }

    /// Record a transaction opened on the master.
    pub fn increment_open_transactions(&self) {
        self.primary().increment_open_transactions();
    }

    /// Record a transaction closed on the master.
    pub fn decrement_open_transactions(&self) {
        self.primary().decrement_open_transactions();
    }

    /// Savepoint name for the master's current nesting depth.
    pub fn current_savepoint_name(&self) -> String {
        self.primary().current_savepoint_name()
    }

    /// Begin a transaction on the master.
    pub async fn begin_db_transaction(&self, cx: &Cx) -> Outcome<(), Error> {
        self.primary().begin_db_transaction(cx).await
    }

    /// Roll back the master's transaction.
    pub async fn rollback_db_transaction(&self, cx: &Cx) -> Outcome<(), Error> {
        self.primary().rollback_db_transaction(cx).await
    }

    /// Savepoints live inside a transaction; with none open on the master
    /// the savepoint operations fail without reaching it.
    fn require_open_transaction(&self, operation: &str, name: &str) -> Result<()> {
        if self.open_transaction() {
            return Ok(());
        }
        Err(Error::Transaction(TransactionError {
            kind: TransactionErrorKind::NotOpen,
            message: format!("cannot {operation} {name}: no transaction is open on the master"),
        }))
    }

    /// Create a savepoint on the master.
    pub async fn create_savepoint(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        if let Err(e) = self.require_open_transaction("create savepoint", name) {
            return Outcome::Err(e);
        }
        self.primary().create_savepoint(cx, name).await
    }

    /// Roll the master back to a savepoint.
    pub async fn rollback_to_savepoint(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        if let Err(e) = self.require_open_transaction("roll back to savepoint", name) {
            return Outcome::Err(e);
        }
        self.primary().rollback_to_savepoint(cx, name).await
    }

    /// Release a savepoint on the master.
    pub async fn release_savepoint(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        if let Err(e) = self.require_open_transaction("release savepoint", name) {
            return Outcome::Err(e);
        }
        self.primary().release_savepoint(cx, name).await
    }

    /// Tables of the master's database.
    pub async fn tables(&self, cx: &Cx) -> Outcome<Vec<String>, Error> {
        self.primary().tables(cx).await
    }

    /// Truncate a table on the master.
    pub async fn truncate_table(&self, cx: &Cx, table: &str) -> Outcome<(), Error> {
        self.primary().truncate_table(cx, table).await
    }

    /// Execute a schema statement (DDL) on the master.
    pub async fn execute_schema(&self, cx: &Cx, sql: &str) -> Outcome<u64, Error> {
        let conn = self.primary();
        tracing::trace!(connection = %conn.identity(), sql, "Schema statement");
        conn.execute(cx, sql, &[]).await
    }

    // ==================== Pool-wide operations ====================

    /// Whether every handle is active (or the connection test is disabled).
    pub async fn is_active(&self, cx: &Cx) -> bool {
        self.pool.is_active(cx).await
    }

    /// Reconnect every handle, attempting all of them.
    pub async fn reconnect_all(&self, cx: &Cx) -> Outcome<(), Error> {
        self.pool.reconnect_all(cx).await
    }

    /// Disconnect every handle, attempting all of them.
    pub async fn disconnect_all(&self, cx: &Cx) -> Outcome<(), Error> {
        self.pool.disconnect_all(cx).await
    }

    /// Reset every handle, attempting all of them.
    pub async fn reset_all(&self, cx: &Cx) -> Outcome<(), Error> {
        self.pool.reset_all(cx).await
    }
}

impl<H: ConnectionHandle> std::fmt::Debug for Router<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("pool", &self.pool).finish()
    }
}
