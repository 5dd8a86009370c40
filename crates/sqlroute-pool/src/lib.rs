//! The master/slave connection pool for SQLRoute.
//!
//! A [`ConnectionPool`] owns exactly one master handle and one or more slave
//! handles for the life of the process. It is built once from a
//! [`RouterConfig`] and never resized. Besides lending out handles it
//! answers two pool-wide questions:
//!
//! - *liveness*: the pool is active only if every handle is (unless the
//!   connection test is disabled by configuration)
//! - *broadcast*: `reconnect`, `disconnect` and `reset` are attempted on
//!   every handle, and failures are collected rather than stopping the
//!   fan-out

pub mod config;
pub mod driver;

use std::future::Future;

use rand::Rng;
use sqlroute_core::{BroadcastError, ConnectionHandle, Cx, Error, Outcome, Role};

pub use config::{NodeConfig, ResolvedConfig, RouterConfig};
pub use driver::{Driver, check_adapter, identity_for};

/// One master handle plus an ordered, non-empty list of slave handles.
///
/// The master is owned separately from the slaves, so it can never be one
/// of them.
pub struct ConnectionPool<H> {
    master: H,
    slaves: Vec<H>,
    disable_connection_test: bool,
}

impl<H: ConnectionHandle> ConnectionPool<H> {
    /// Assemble a pool from already-open handles.
    ///
    /// Fails with a configuration error when `slaves` is empty.
    #[allow(clippy::result_large_err)]
    pub fn new(master: H, slaves: Vec<H>) -> Result<Self, Error> {
        if slaves.is_empty() {
            return Err(Error::config("at least one slave connection is required"));
        }
        Ok(Self {
            master,
            slaves,
            disable_connection_test: false,
        })
    }

    /// Skip liveness checks and always report the pool as active.
    pub fn with_connection_test_disabled(mut self, disabled: bool) -> Self {
        self.disable_connection_test = disabled;
        self
    }

    /// Open one handle per configured node using `driver`.
    ///
    /// Configuration problems (missing nodes, an adapter `driver` does not
    /// serve) fail before any connection is attempted. A node that cannot be
    /// reached fails the whole pool: startup is all or nothing.
    #[tracing::instrument(level = "debug", skip_all, fields(adapter = driver.adapter_name()))]
    pub async fn connect<D>(cx: &Cx, driver: &D, config: &RouterConfig) -> Outcome<Self, Error>
    where
        D: Driver<Handle = H>,
    {
        let resolved = match config.resolve() {
            Ok(resolved) => resolved,
            Err(e) => return Outcome::Err(e),
        };
        if let Err(e) = check_adapter(driver, &resolved.connection_adapter) {
            return Outcome::Err(e);
        }

        let master = match Self::connect_node(cx, driver, &resolved.master, Role::Master).await {
            Outcome::Ok(handle) => handle,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut slaves = Vec::with_capacity(resolved.slaves.len());
        for node in &resolved.slaves {
            match Self::connect_node(cx, driver, node, Role::Slave).await {
                Outcome::Ok(handle) => slaves.push(handle),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        tracing::info!(
            master = %master.identity(),
            slaves = slaves.len(),
            disable_connection_test = resolved.disable_connection_test,
            "Connection pool ready"
        );

        match Self::new(master, slaves) {
            Ok(pool) => Outcome::Ok(pool.with_connection_test_disabled(resolved.disable_connection_test)),
            Err(e) => Outcome::Err(e),
        }
    }

    async fn connect_node<D>(
        cx: &Cx,
        driver: &D,
        node: &NodeConfig,
        role: Role,
    ) -> Outcome<H, Error>
    where
        D: Driver<Handle = H>,
    {
        let identity = identity_for(node, role);
        tracing::debug!(connection = %identity, "Connecting");
        driver.connect(cx, node, identity).await
    }

    /// The master handle.
    pub fn primary(&self) -> &H {
        &self.master
    }

    /// The slave handles, in configuration order.
    pub fn replicas(&self) -> &[H] {
        &self.slaves
    }

    /// The slave at `index`, if any.
    pub fn replica(&self, index: usize) -> Option<&H> {
        self.slaves.get(index)
    }

    /// Index of a uniformly random slave.
    ///
    /// Not referentially transparent: every call draws again.
    pub fn pick_replica_index(&self) -> usize {
        rand::thread_rng().gen_range(0..self.slaves.len())
    }

    /// A uniformly random slave handle.
    ///
    /// Not referentially transparent: repeated calls may return different
    /// handles for the same pool.
    pub fn pick_replica(&self) -> &H {
        &self.slaves[self.pick_replica_index()]
    }

    /// Master first, then every slave.
    pub fn all(&self) -> impl Iterator<Item = &H> {
        std::iter::once(&self.master).chain(self.slaves.iter())
    }

    /// Total number of handles (master included).
    pub fn len(&self) -> usize {
        1 + self.slaves.len()
    }

    /// A pool always holds at least a master and one slave.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether liveness checks are bypassed.
    pub fn connection_test_disabled(&self) -> bool {
        self.disable_connection_test
    }

    /// True only if every handle is active, or the connection test is
    /// disabled. One dead handle makes the whole pool inactive.
    pub async fn is_active(&self, cx: &Cx) -> bool {
        if self.disable_connection_test {
            return true;
        }
        let mut active = true;
        for handle in self.all() {
            if !handle.is_active(cx).await {
                tracing::debug!(connection = %handle.identity(), "Connection inactive");
                active = false;
            }
        }
        active
    }

    /// Reconnect every handle.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn reconnect_all(&self, cx: &Cx) -> Outcome<(), Error> {
        self.broadcast("reconnect", |h| h.reconnect(cx)).await
    }

    /// Disconnect every handle.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn disconnect_all(&self, cx: &Cx) -> Outcome<(), Error> {
        self.broadcast("disconnect", |h| h.disconnect(cx)).await
    }

    /// Reset every handle's session state.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn reset_all(&self, cx: &Cx) -> Outcome<(), Error> {
        self.broadcast("reset", |h| h.reset(cx)).await
    }

    /// Run `op` on every handle; an error on one does not stop the others.
    async fn broadcast<'a, F, Fut>(&'a self, operation: &'static str, op: F) -> Outcome<(), Error>
    where
        F: Fn(&'a H) -> Fut,
        Fut: Future<Output = Outcome<(), Error>>,
    {
        let mut failures = Vec::new();
        for handle in self.all() {
            match op(handle).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => {
                    tracing::warn!(
                        connection = %handle.identity(),
                        operation,
                        error = %e,
                        "Broadcast operation failed on connection"
                    );
                    failures.push((handle.identity().to_string(), e));
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        if failures.is_empty() {
            Outcome::Ok(())
        } else {
            Outcome::Err(Error::Broadcast(BroadcastError {
                operation,
                failures,
            }))
        }
    }
}

impl<H: ConnectionHandle> std::fmt::Debug for ConnectionPool<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("master", &self.master.identity().to_string())
            .field(
                "slaves",
                &self
                    .slaves
                    .iter()
                    .map(|s| s.identity().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("disable_connection_test", &self.disable_connection_test)
            .finish()
    }
}
