//! In-memory driver shared by the integration tests.
//!
//! Every [`MockHandle`] answers ordinary queries with a single row whose
//! `node` column is the handle's name, so tests can tell where a read went.
//! Replication status comes from a clock the test sets by hand.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Waker};

use asupersync::CancelReason;
use asupersync::runtime::RuntimeBuilder;
use sqlroute::{
    Clock, ConnectionErrorKind, ConnectionHandle, ConnectionPool, Cx, Driver, Error,
    HandleIdentity, MASTER_STATUS_SQL, NodeConfig, Outcome, Role, Router, Row, SLAVE_STATUS_SQL,
    Value,
};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error, got a value"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Run `f` on a fresh current-thread runtime with a testing context.
pub fn run<F>(f: F)
where
    F: AsyncFnOnce(&Cx),
{
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(async { f(&cx).await });
}

/// Poll `fut` once with a no-op waker, then drop it. Returns whether it was
/// still pending when dropped.
pub fn poll_once_then_drop<F: Future>(fut: F) -> bool {
    let mut fut = std::pin::pin!(fut);
    let mut task = Context::from_waker(Waker::noop());
    fut.as_mut().poll(&mut task).is_pending()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn refused(identity: &HandleIdentity, what: &str) -> Error {
    Error::connection(
        ConnectionErrorKind::Disconnected,
        format!("{what} failed on {identity}"),
    )
}

/// A scripted connection.
#[derive(Debug)]
pub struct MockHandle {
    identity: HandleIdentity,
    active: AtomicBool,
    open: AtomicUsize,
    status: Mutex<Option<Clock>>,
    statements: Mutex<Vec<String>>,
    fail_reconnect: AtomicBool,
    cancel_reconnect: AtomicBool,
    fail_commit: AtomicBool,
    fail_probe: AtomicBool,
    fail_writes: AtomicBool,
    next_id: AtomicI64,
}

impl MockHandle {
    pub fn new(identity: HandleIdentity) -> Self {
        Self {
            identity,
            active: AtomicBool::new(true),
            open: AtomicUsize::new(0),
            status: Mutex::new(None),
            statements: Mutex::new(Vec::new()),
            fail_reconnect: AtomicBool::new(false),
            cancel_reconnect: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn master() -> Self {
        Self::new(HandleIdentity::new(Role::Master).host("db-primary"))
    }

    pub fn slave(name: &str) -> Self {
        Self::new(HandleIdentity::new(Role::Slave).name(name).host(name))
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Status clock: the binlog position for a master, the applied position
    /// for a slave. `None` makes the status query return no row.
    pub fn set_status(&self, clock: Option<Clock>) {
        *lock(&self.status) = clock;
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    /// Reconnect reports cancellation instead of an error.
    pub fn cancel_reconnect(&self, cancel: bool) {
        self.cancel_reconnect.store(cancel, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every statement this handle saw, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    pub fn saw(&self, sql: &str) -> bool {
        lock(&self.statements).iter().any(|s| s == sql)
    }

    fn record(&self, sql: &str) {
        lock(&self.statements).push(sql.to_string());
    }

    fn status_row(&self, sql: &str) -> Outcome<Option<Row>, Error> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Outcome::Err(refused(&self.identity, "status probe"));
        }
        let Some(clock) = lock(&self.status).clone() else {
            return Outcome::Ok(None);
        };
        let (file_col, pos_col) = if sql == MASTER_STATUS_SQL {
            ("File", "Position")
        } else {
            ("Relay_Master_Log_File", "Exec_Master_Log_Pos")
        };
        Outcome::Ok(Some(Row::from_pairs([
            (file_col, Value::from(clock.file())),
            (pos_col, Value::UBigInt(clock.position())),
        ])))
    }

    fn node_row(&self) -> Row {
        Row::from_pairs([("node", Value::from(self.name()))])
    }

    fn write(&self, sql: &str) -> Outcome<u64, Error> {
        self.record(sql);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Outcome::Err(refused(&self.identity, "write"));
        }
        Outcome::Ok(1)
    }
}

impl ConnectionHandle for MockHandle {
    fn identity(&self) -> &HandleIdentity {
        &self.identity
    }

    fn adapter_name(&self) -> &str {
        "mock"
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.record(sql);
        let rows = vec![self.node_row()];
        async move { Outcome::Ok(rows) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        self.record(sql);
        let result = if sql == MASTER_STATUS_SQL || sql == SLAVE_STATUS_SQL {
            self.status_row(sql)
        } else {
            Outcome::Ok(Some(self.node_row()))
        };
        async move { result }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.write(sql);
        async move { result }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let result = match self.write(sql) {
            Outcome::Ok(_) => Outcome::Ok(self.next_id.fetch_add(1, Ordering::SeqCst)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        };
        async move { result }
    }

    fn begin_db_transaction(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.record("BEGIN");
        async { Outcome::Ok(()) }
    }

    fn commit_db_transaction(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.record("COMMIT");
        let result = if self.fail_commit.load(Ordering::SeqCst) {
            Outcome::Err(refused(&self.identity, "commit"))
        } else {
            Outcome::Ok(())
        };
        async move { result }
    }

    fn rollback_db_transaction(
        &self,
        _cx: &Cx,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.record("ROLLBACK");
        async { Outcome::Ok(()) }
    }

    fn open_transactions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn increment_open_transactions(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_open_transactions(&self) {
        let _ = self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn tables(&self, _cx: &Cx) -> impl Future<Output = Outcome<Vec<String>, Error>> + Send {
        let tables = vec![format!("{}_users", self.name())];
        async move { Outcome::Ok(tables) }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = if self.active.load(Ordering::SeqCst) {
            Outcome::Ok(())
        } else {
            Outcome::Err(refused(&self.identity, "ping"))
        };
        async move { result }
    }

    fn reconnect(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.record("RECONNECT");
        let result = if self.cancel_reconnect.load(Ordering::SeqCst) {
            Outcome::Cancelled(CancelReason::user("reconnect cancelled"))
        } else if self.fail_reconnect.load(Ordering::SeqCst) {
            Outcome::Err(refused(&self.identity, "reconnect"))
        } else {
            self.active.store(true, Ordering::SeqCst);
            Outcome::Ok(())
        };
        async move { result }
    }

    fn disconnect(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.record("DISCONNECT");
        self.active.store(false, Ordering::SeqCst);
        async { Outcome::Ok(()) }
    }

    fn reset(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.record("RESET");
        self.open.store(0, Ordering::SeqCst);
        async { Outcome::Ok(()) }
    }
}

/// Opens [`MockHandle`]s, refusing nodes whose host is listed as down.
#[derive(Debug, Default)]
pub struct MockDriver {
    down_hosts: Vec<String>,
    connected: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down(mut self, host: &str) -> Self {
        self.down_hosts.push(host.to_string());
        self
    }

    /// Identities connected so far, in order.
    pub fn connected(&self) -> Vec<String> {
        lock(&self.connected).clone()
    }
}

impl Driver for MockDriver {
    type Handle = MockHandle;

    fn adapter_name(&self) -> &str {
        "mock"
    }

    fn connect(
        &self,
        _cx: &Cx,
        config: &NodeConfig,
        identity: HandleIdentity,
    ) -> impl Future<Output = Outcome<MockHandle, Error>> + Send {
        let down = config
            .host
            .as_ref()
            .is_some_and(|host| self.down_hosts.contains(host));
        let result = if down {
            Outcome::Err(Error::connection(
                ConnectionErrorKind::Refused,
                format!("cannot reach {identity}"),
            ))
        } else {
            lock(&self.connected).push(identity.to_string());
            Outcome::Ok(MockHandle::new(identity))
        };
        async move { result }
    }
}

/// A router over a master and slaves named `replica-0`, `replica-1`, ...
pub fn router(slaves: usize) -> Router<MockHandle> {
    let slaves = (0..slaves)
        .map(|i| MockHandle::slave(&format!("replica-{i}")))
        .collect();
    let pool = ConnectionPool::new(MockHandle::master(), slaves).expect("build pool");
    Router::new(pool)
}

/// The `node` column of a row.
pub fn node(row: &Row) -> String {
    row.get_by_name("node")
        .and_then(Value::as_str)
        .expect("row has a node column")
        .to_string()
}
