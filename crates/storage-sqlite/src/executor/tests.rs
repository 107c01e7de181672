use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use rust_decimal_macros::dec;
use serde_json::Value;

use tillsync_core::entities::{Collection, PaymentMethod};
use tillsync_core::errors::{BusinessRejection, Error, ValidationError};
use tillsync_core::events::{ChangeAction, RecordingEventSink};
use tillsync_core::idempotency::{EntityQueryTrait, IdempotencyPolicy, IdempotentExecutorTrait};
use tillsync_core::operations::{
    CoworkingEndInput, CoworkingStartInput, CutCreateInput, OperationPayload, OrderCreateInput,
    OrderLineInput, ProductUpsertInput, SessionCloseInput, SessionOpenInput,
};

use super::TransactionExecutor;
use crate::db::{Database, DatabaseRole};
use crate::idempotency::IdempotencyRepository;
use crate::pos::PosRepository;

struct Harness {
    _dir: tempfile::TempDir,
    executor: Arc<TransactionExecutor>,
    sink: Arc<RecordingEventSink>,
    pos: PosRepository,
    records: IdempotencyRepository,
}

fn harness_with_policy(policy: IdempotencyPolicy) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.db");
    let db = Database::open(path.to_str().expect("utf8"), DatabaseRole::Server).expect("open");
    let sink = Arc::new(RecordingEventSink::new());
    let executor = Arc::new(
        TransactionExecutor::new(db.writer.clone(), policy).with_event_sink(sink.clone()),
    );
    Harness {
        _dir: dir,
        executor,
        sink,
        pos: PosRepository::new(db.pool.clone()),
        records: IdempotencyRepository::new(db.pool),
    }
}

fn harness() -> Harness {
    harness_with_policy(IdempotencyPolicy::default())
}

fn product(id: &str, price: rust_decimal::Decimal, stock: i64) -> OperationPayload {
    OperationPayload::ProductUpsert(ProductUpsertInput {
        product_id: id.to_string(),
        name: format!("Product {}", id),
        price,
        stock,
    })
}

fn order(id: &str, session: Option<&str>, method: PaymentMethod, lines: &[(&str, i64)]) -> OperationPayload {
    OperationPayload::OrderCreate(OrderCreateInput {
        order_id: id.to_string(),
        cash_session_id: session.map(str::to_string),
        payment_method: method,
        lines: lines
            .iter()
            .map(|(product_id, quantity)| OrderLineInput {
                product_id: product_id.to_string(),
                quantity: *quantity,
            })
            .collect(),
    })
}

async fn seed(h: &Harness, payload: OperationPayload) {
    let key = format!("seed-{}", payload.stream_key().replace(':', "-"));
    h.executor.execute(key, payload).await.expect("seed");
}

#[tokio::test]
async fn repeated_submission_charges_once() {
    let h = harness();
    seed(&h, product("desk-day", dec!(100), 10)).await;

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(
            h.executor
                .execute(
                    "key-100".to_string(),
                    order("ord-1", None, PaymentMethod::Card, &[("desk-day", 1)]),
                )
                .await
                .expect("execute"),
        );
    }

    assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
    assert!(outcomes
        .iter()
        .all(|o| o.result_snapshot == outcomes[0].result_snapshot));

    let orders = h.pos.list_orders().expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total, dec!(100));
    assert_eq!(h.pos.get_product("desk-day").expect("get").expect("exists").stock, 9);
}

#[tokio::test]
async fn oversized_order_is_refused_and_writer_keeps_serving() {
    let h = harness();
    seed(&h, product("gold", dec!(1000000000), 1_000_000_000)).await;

    let err = h
        .executor
        .execute(
            "key-huge".to_string(),
            order(
                "ord-huge",
                None,
                PaymentMethod::Card,
                &[("gold", 1_000_000_000_000_000_000)],
            ),
        )
        .await
        .expect_err("quantity beyond limits");
    assert!(matches!(err, Error::Validation(_)));

    // Largest order the limits allow still totals exactly.
    let lines: Vec<(&str, i64)> = (0..200).map(|_| ("gold", 1_000_000)).collect();
    let outcome = h
        .executor
        .execute(
            "key-max".to_string(),
            order("ord-max", None, PaymentMethod::Card, &lines),
        )
        .await
        .expect("max order");
    let body: Value = serde_json::from_str(&outcome.result_snapshot).expect("json");
    assert_eq!(body["total"], "200000000000000000.00");

    h.executor
        .execute("key-after".to_string(), product("tea", dec!(2), 3))
        .await
        .expect("writer still serves");
    assert_eq!(
        h.pos.get_product("gold").expect("get").expect("exists").stock,
        800_000_000
    );
}

#[tokio::test]
async fn concurrent_duplicates_execute_once() {
    let h = harness();
    seed(&h, product("coffee", dec!(2.50), 50)).await;

    let tasks = (0..8).map(|_| {
        let executor = Arc::clone(&h.executor);
        tokio::spawn(async move {
            executor
                .execute(
                    "key-concurrent".to_string(),
                    order("ord-c", None, PaymentMethod::Cash, &[("coffee", 3)]),
                )
                .await
        })
    });
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("join").expect("execute"))
        .collect();

    assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
    assert!(outcomes
        .iter()
        .all(|o| o.result_snapshot == outcomes[0].result_snapshot));
    assert_eq!(h.pos.get_product("coffee").expect("get").expect("exists").stock, 47);
}

#[tokio::test]
async fn validation_failure_leaves_no_record() {
    let h = harness();
    seed(&h, product("tea", dec!(3), 5)).await;
    let before = h.records.count_records().expect("count");

    let err = h
        .executor
        .execute(
            "key-fix-me".to_string(),
            order("ord-v", None, PaymentMethod::Cash, &[("tea", 0)]),
        )
        .await
        .expect_err("zero quantity");
    assert!(matches!(err, Error::Validation(ValidationError::InvalidInput(_))));
    assert_eq!(h.records.count_records().expect("count"), before);

    let corrected = h
        .executor
        .execute(
            "key-fix-me".to_string(),
            order("ord-v", None, PaymentMethod::Cash, &[("tea", 1)]),
        )
        .await
        .expect("corrected input executes");
    assert!(!corrected.replayed);
}

#[tokio::test]
async fn business_rejection_rolls_back_everything() {
    let h = harness();
    seed(&h, product("tea", dec!(3), 5)).await;
    seed(&h, product("cake", dec!(4), 1)).await;

    let err = h
        .executor
        .execute(
            "key-short".to_string(),
            order("ord-r", None, PaymentMethod::Cash, &[("tea", 2), ("cake", 2)]),
        )
        .await
        .expect_err("not enough cake");
    assert!(matches!(
        err,
        Error::Rejected(BusinessRejection::InsufficientStock { ref product_id, requested: 2, available: 1 })
            if product_id == "cake"
    ));
    assert_eq!(h.pos.get_product("tea").expect("get").expect("exists").stock, 5);
    assert!(h.pos.get_order("ord-r").expect("get").is_none());
    assert!(h.records.get_record("key-short").expect("get").is_none());
}

#[tokio::test]
async fn reused_key_with_different_payload_is_rejected() {
    let h = harness();
    seed(&h, product("tea", dec!(3), 5)).await;
    h.executor
        .execute(
            "key-once".to_string(),
            order("ord-a", None, PaymentMethod::Cash, &[("tea", 1)]),
        )
        .await
        .expect("first");

    let err = h
        .executor
        .execute(
            "key-once".to_string(),
            order("ord-b", None, PaymentMethod::Cash, &[("tea", 1)]),
        )
        .await
        .expect_err("different payload");
    assert_eq!(err.code(), "IDEMPOTENCY_KEY_REUSED");
    assert_eq!(h.pos.get_product("tea").expect("get").expect("exists").stock, 4);
}

#[tokio::test]
async fn expired_key_is_a_new_operation() {
    let h = harness_with_policy(IdempotencyPolicy {
        ttl: Duration::zero(),
    });
    seed(&h, product("tea", dec!(3), 5)).await;

    let first = h
        .executor
        .execute(
            "key-stale".to_string(),
            order("ord-1", None, PaymentMethod::Cash, &[("tea", 1)]),
        )
        .await
        .expect("first");
    let second = h
        .executor
        .execute(
            "key-stale".to_string(),
            order("ord-2", None, PaymentMethod::Cash, &[("tea", 1)]),
        )
        .await
        .expect("second");

    assert!(!first.replayed);
    assert!(!second.replayed);
    assert_eq!(h.pos.list_orders().expect("orders").len(), 2);
    assert_eq!(h.pos.get_product("tea").expect("get").expect("exists").stock, 3);
}

#[tokio::test]
async fn purge_removes_only_expired_records() {
    let h = harness_with_policy(IdempotencyPolicy {
        ttl: Duration::zero(),
    });
    seed(&h, product("tea", dec!(3), 5)).await;
    assert_eq!(h.records.count_records().expect("count"), 1);
    assert_eq!(h.executor.purge_expired().await.expect("purge"), 1);
    assert_eq!(h.records.count_records().expect("count"), 0);

    let live = harness();
    seed(&live, product("tea", dec!(3), 5)).await;
    assert_eq!(live.executor.purge_expired().await.expect("purge"), 0);
}

#[tokio::test]
async fn broadcast_follows_fresh_commits_only() {
    let h = harness();
    seed(&h, product("coffee", dec!(2.50), 10)).await;
    let seeded = h.sink.events().len();

    let payload = order("ord-e", None, PaymentMethod::Card, &[("coffee", 1), ("coffee", 2)]);
    h.executor
        .execute("key-e".to_string(), payload.clone())
        .await
        .expect("execute");
    let events = h.sink.events()[seeded..].to_vec();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].data_type, Collection::Orders);
    assert_eq!(events[0].action, ChangeAction::Create);
    assert_eq!(events[1].data_type, Collection::Products);
    assert_eq!(events[1].entity_id, "coffee");

    h.executor
        .execute("key-e".to_string(), payload)
        .await
        .expect("replay");
    assert_eq!(h.sink.events().len(), seeded + 2);
}

#[tokio::test]
async fn cash_session_close_reconciles_expected_cash() {
    let h = harness();
    seed(&h, product("coffee", dec!(2.50), 10)).await;
    h.executor
        .execute(
            "open-1".to_string(),
            OperationPayload::SessionOpen(SessionOpenInput {
                session_id: "s-1".to_string(),
                opening_float: dec!(100),
            }),
        )
        .await
        .expect("open");
    h.executor
        .execute(
            "o-cash".to_string(),
            order("o-cash", Some("s-1"), PaymentMethod::Cash, &[("coffee", 2)]),
        )
        .await
        .expect("cash order");
    h.executor
        .execute(
            "o-card".to_string(),
            order("o-card", Some("s-1"), PaymentMethod::Card, &[("coffee", 1)]),
        )
        .await
        .expect("card order");

    let cut = h
        .executor
        .execute(
            "cut-1".to_string(),
            OperationPayload::CutCreate(CutCreateInput {
                cut_id: "cut-1".to_string(),
                session_id: "s-1".to_string(),
                counted_amount: dec!(105),
                note: Some("  midday  ".to_string()),
            }),
        )
        .await
        .expect("cut");
    let cut: Value = cut.result_json().expect("json");
    assert_eq!(cut["expectedAmount"], "105.00");
    assert_eq!(cut["note"], "midday");

    let closed = h
        .executor
        .execute(
            "close-1".to_string(),
            OperationPayload::SessionClose(SessionCloseInput {
                session_id: "s-1".to_string(),
                counted_cash: dec!(104),
            }),
        )
        .await
        .expect("close");
    assert!(!closed.replayed);
    let session = h.pos.get_cash_session("s-1").expect("get").expect("exists");
    assert_eq!(session.expected_cash, Some(dec!(105)));
    assert_eq!(session.difference, Some(dec!(-1)));

    let late = h
        .executor
        .execute(
            "o-late".to_string(),
            order("o-late", Some("s-1"), PaymentMethod::Cash, &[("coffee", 1)]),
        )
        .await
        .expect_err("session closed");
    assert_eq!(late.code(), "SESSION_NOT_OPEN");
}

#[tokio::test]
async fn coworking_end_bills_rounded_minutes() {
    let h = harness();
    h.executor
        .execute(
            "cw-start".to_string(),
            OperationPayload::CoworkingStart(CoworkingStartInput {
                coworking_session_id: "cw-1".to_string(),
                customer_name: "Ana".to_string(),
                hourly_rate: dec!(60),
                started_at: "2026-02-01T09:00:00.000Z".to_string(),
            }),
        )
        .await
        .expect("start");
    h.executor
        .execute(
            "cw-end".to_string(),
            OperationPayload::CoworkingEnd(CoworkingEndInput {
                coworking_session_id: "cw-1".to_string(),
                ended_at: "2026-02-01T10:30:01.000Z".to_string(),
            }),
        )
        .await
        .expect("end");

    let session = h
        .pos
        .get_coworking_session("cw-1")
        .expect("get")
        .expect("exists");
    assert_eq!(session.billed_minutes, Some(91));
    assert_eq!(session.amount, Some(dec!(91)));

    let again = h
        .executor
        .execute(
            "cw-end-2".to_string(),
            OperationPayload::CoworkingEnd(CoworkingEndInput {
                coworking_session_id: "cw-1".to_string(),
                ended_at: "2026-02-01T11:00:00.000Z".to_string(),
            }),
        )
        .await
        .expect_err("already ended");
    assert_eq!(again.code(), "COWORKING_NOT_ACTIVE");
}

#[tokio::test]
async fn pull_side_lists_collections_as_json() {
    let h = harness();
    seed(&h, product("tea", dec!(3), 5)).await;
    let items = h.pos.list_collection(Collection::Products).expect("list");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["price"], "3.00");
    assert!(h
        .pos
        .get_entity(Collection::Orders, "missing")
        .expect("get")
        .is_none());
}
