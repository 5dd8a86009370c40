mod common;

use common::{MockHandle, expect_err, node, poll_once_then_drop, router, run, unwrap_outcome};
use sqlroute::{
    Clock, ConnectionErrorKind, ConnectionHandle, Cx, Error, MASTER_STATUS_SQL, Outcome,
    Selection, TransactionError, TransactionErrorKind,
};

#[test]
fn transaction_commits_and_refreshes_clock() {
    run(async |cx: &Cx| {
        let router = router(1);
        router.primary().set_status(Some(Clock::new("bin.3", 40)));
        let ctx = router.context();

        let id = unwrap_outcome(
            router
                .transaction(cx, &ctx, async |_conn: &MockHandle| {
                    assert_eq!(router.open_transactions(), 1);
                    let read = unwrap_outcome(router.select_one(cx, &ctx, "SELECT 1", &[]).await);
                    assert_eq!(node(&read.expect("row")), "master");

                    let id = unwrap_outcome(
                        router.insert(cx, &ctx, "INSERT INTO t VALUES (1)", &[]).await,
                    );
                    // No clock refresh mid-transaction.
                    assert_eq!(ctx.clock(), None);
                    Outcome::Ok(id)
                })
                .await,
        );

        assert_eq!(id, 1);
        assert_eq!(router.open_transactions(), 0);
        assert_eq!(ctx.clock(), Some(Clock::new("bin.3", 40)));
        assert_eq!(ctx.current(), Some(Selection::Master));

        let statements = router.primary().statements();
        let begin = statements.iter().position(|s| s == "BEGIN").expect("BEGIN");
        let commit = statements.iter().position(|s| s == "COMMIT").expect("COMMIT");
        let probe = statements
            .iter()
            .position(|s| s == MASTER_STATUS_SQL)
            .expect("status probe");
        assert!(begin < commit && commit < probe);
    });
}

#[test]
fn transaction_rolls_back_on_error() {
    run(async |cx: &Cx| {
        let router = router(1);
        router.primary().set_status(Some(Clock::new("bin.3", 40)));
        let ctx = router.context();

        let err = expect_err(
            router
                .transaction(cx, &ctx, async |_conn: &MockHandle| -> Outcome<(), Error> {
                    Outcome::Err(Error::connection(ConnectionErrorKind::Disconnected, "gone"))
                })
                .await,
        );

        assert!(err.is_connection_error());
        assert!(router.primary().saw("ROLLBACK"));
        assert!(!router.primary().saw("COMMIT"));
        assert_eq!(router.open_transactions(), 0);
        assert_eq!(ctx.clock(), None);
        assert_eq!(ctx.depth(), 0);
    });
}

#[test]
fn nested_transaction_joins_the_outer_one() {
    run(async |cx: &Cx| {
        let router = router(1);
        let ctx = router.context();

        unwrap_outcome(
            router
                .transaction(cx, &ctx, async |_outer: &MockHandle| {
                    router
                        .transaction(cx, &ctx, async |_inner: &MockHandle| {
                            assert_eq!(router.open_transactions(), 1);
                            Outcome::Ok(())
                        })
                        .await
                })
                .await,
        );

        let statements = router.primary().statements();
        assert_eq!(statements.iter().filter(|s| *s == "BEGIN").count(), 1);
        assert_eq!(statements.iter().filter(|s| *s == "COMMIT").count(), 1);
    });
}

#[test]
fn savepoints_and_schema_go_to_master() {
    run(async |cx: &Cx| {
        let router = router(2);

        assert!(router.supports_savepoints());
        assert_eq!(router.adapter_name(), "mock");

        router.increment_open_transactions();
        let name = router.current_savepoint_name();
        assert_eq!(name, "sqlroute_sp_1");
        unwrap_outcome(router.create_savepoint(cx, &name).await);
        unwrap_outcome(router.rollback_to_savepoint(cx, &name).await);
        unwrap_outcome(router.release_savepoint(cx, &name).await);
        router.decrement_open_transactions();

        unwrap_outcome(router.truncate_table(cx, "users").await);
        unwrap_outcome(router.execute_schema(cx, "CREATE TABLE t (id INT)").await);
        let tables = unwrap_outcome(router.tables(cx).await);
        assert_eq!(tables, vec!["master_users".to_string()]);

        let master = router.primary().statements();
        assert!(master.contains(&"SAVEPOINT sqlroute_sp_1".to_string()));
        assert!(master.contains(&"ROLLBACK TO SAVEPOINT sqlroute_sp_1".to_string()));
        assert!(master.contains(&"RELEASE SAVEPOINT sqlroute_sp_1".to_string()));
        assert!(master.contains(&"TRUNCATE TABLE `users`".to_string()));
        assert!(master.contains(&"CREATE TABLE t (id INT)".to_string()));
        for replica in router.pool().replicas() {
            assert!(replica.statements().is_empty());
        }
    });
}

#[test]
fn failed_commit_rolls_back() {
    run(async |cx: &Cx| {
        let router = router(1);
        router.primary().set_status(Some(Clock::new("bin.3", 40)));
        router.primary().fail_commit(true);
        let ctx = router.context();

        let err = expect_err(
            router
                .transaction(cx, &ctx, async |conn: &MockHandle| {
                    conn.execute(cx, "UPDATE t SET x = 1", &[]).await
                })
                .await,
        );

        assert!(err.is_connection_error());
        assert!(err.to_string().contains("commit"));
        assert_eq!(
            router.primary().statements(),
            vec!["BEGIN", "UPDATE t SET x = 1", "COMMIT", "ROLLBACK"]
        );
        assert_eq!(router.open_transactions(), 0);
        // The commit never happened, so there is no position to track.
        assert_eq!(ctx.clock(), None);
        assert_eq!(ctx.depth(), 0);
    });
}

#[test]
fn savepoints_require_an_open_transaction() {
    run(async |cx: &Cx| {
        let router = router(1);
        assert_eq!(router.open_transactions(), 0);

        let err = expect_err(router.create_savepoint(cx, "sp_1").await);
        assert!(matches!(
            err,
            Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotOpen,
                ..
            })
        ));
        assert!(err.to_string().contains("sp_1"));

        let err = expect_err(router.rollback_to_savepoint(cx, "sp_1").await);
        assert!(matches!(err, Error::Transaction(_)));
        let err = expect_err(router.release_savepoint(cx, "sp_1").await);
        assert!(matches!(err, Error::Transaction(_)));

        assert!(router.primary().statements().is_empty());
    });
}

#[test]
fn dropped_transaction_restores_count_and_scope() {
    let router = router(1);
    let ctx = router.context();
    let cx = Cx::for_testing();

    let pending = poll_once_then_drop(router.transaction(
        &cx,
        &ctx,
        async |_conn: &MockHandle| -> Outcome<(), Error> {
            assert_eq!(ctx.depth(), 1);
            std::future::pending::<()>().await;
            Outcome::Ok(())
        },
    ));

    assert!(pending);
    assert_eq!(router.open_transactions(), 0);
    assert_eq!(ctx.depth(), 0);
    // Nothing can be sent from drop; the transaction is left to the driver.
    assert_eq!(router.primary().statements(), vec!["BEGIN"]);
}
