use std::sync::Arc;

use axum::Router;

use crate::main_lib::AppState;

mod events;
mod health;
mod operations;
mod sync;

pub fn app_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(operations::router())
        .merge(sync::router())
        .merge(events::router())
        .merge(health::router());

    Router::new().nest("/api/v1", api).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::main_lib::build_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tillsync_core::entities::Collection;
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        state: Arc<AppState>,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let config = ServerConfig {
                db_path: dir
                    .path()
                    .join("server.db")
                    .to_str()
                    .expect("utf8")
                    .to_string(),
                ..ServerConfig::default()
            };
            let state = build_state(&config).expect("state");
            Self { _dir: dir, state }
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            key: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Option<String>, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(key) = key {
                builder = builder.header("Idempotency-Key", key);
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => builder.body(Body::empty()),
            }
            .expect("request");

            let response = app_router(Arc::clone(&self.state))
                .oneshot(request)
                .await
                .expect("response");
            let status = response.status();
            let replayed = response
                .headers()
                .get("x-idempotent-replayed")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).expect("json body")
            };
            (status, replayed, json)
        }

        async fn seed_coffee_and_session(&self) {
            let (status, _, _) = self
                .send(
                    "PUT",
                    "/api/v1/products/p-1",
                    Some("seed-product"),
                    Some(json!({"productId": "p-1", "name": "Coffee", "price": "100.00", "stock": 5})),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            let (status, _, _) = self
                .send(
                    "POST",
                    "/api/v1/cash-sessions",
                    Some("seed-session"),
                    Some(json!({"sessionId": "s-1", "openingFloat": "20"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    fn order_body(quantity: i64) -> Value {
        json!({
            "orderId": "o-1",
            "cashSessionId": "s-1",
            "paymentMethod": "cash",
            "lines": [{"productId": "p-1", "quantity": quantity}]
        })
    }

    #[tokio::test]
    async fn missing_idempotency_key_is_rejected_before_execution() {
        let app = TestApp::new();
        let (status, _, body) = app
            .send("POST", "/api/v1/orders", None, Some(order_body(1)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
        assert!(app
            .state
            .query
            .list_collection(Collection::Orders)
            .expect("orders")
            .is_empty());
    }

    #[tokio::test]
    async fn five_submissions_charge_once() {
        let app = TestApp::new();
        app.seed_coffee_and_session().await;

        let mut results = Vec::new();
        for _ in 0..5 {
            results.push(
                app.send("POST", "/api/v1/orders", Some("order-key-1"), Some(order_body(1)))
                    .await,
            );
        }

        assert_eq!(results[0].0, StatusCode::CREATED);
        assert_eq!(results[0].1.as_deref(), Some("false"));
        for (status, replayed, body) in &results[1..] {
            assert_eq!(*status, StatusCode::CREATED);
            assert_eq!(replayed.as_deref(), Some("true"));
            assert_eq!(body, &results[0].2);
        }
        assert_eq!(results[0].2["total"], "100.00");

        let orders = app
            .state
            .query
            .list_collection(Collection::Orders)
            .expect("orders");
        assert_eq!(orders.len(), 1);
        let (_, _, product) = app.send("GET", "/api/v1/sync/products/p-1", None, None).await;
        assert_eq!(product["stock"], 4);
    }

    #[tokio::test]
    async fn business_rejection_is_422_and_not_recorded() {
        let app = TestApp::new();
        app.seed_coffee_and_session().await;

        let (status, replayed, body) = app
            .send("POST", "/api/v1/orders", Some("too-many"), Some(order_body(9)))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(replayed, None);
        assert_eq!(body["code"], "INSUFFICIENT_STOCK");

        // Same key with corrected input executes.
        let (status, replayed, _) = app
            .send("POST", "/api/v1/orders", Some("too-many"), Some(order_body(2)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(replayed.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn reused_key_with_different_payload_is_422() {
        let app = TestApp::new();
        app.seed_coffee_and_session().await;

        app.send("POST", "/api/v1/orders", Some("k-1"), Some(order_body(1)))
            .await;
        let (status, _, body) = app
            .send("POST", "/api/v1/orders", Some("k-1"), Some(order_body(2)))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "IDEMPOTENCY_KEY_REUSED");
    }

    #[tokio::test]
    async fn invalid_payload_and_path_mismatch_are_400() {
        let app = TestApp::new();
        let (status, _, _) = app
            .send(
                "PUT",
                "/api/v1/products/p-1",
                Some("k-bad"),
                Some(json!({"productId": "p-1", "name": "Coffee"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = app
            .send(
                "PUT",
                "/api/v1/products/p-2",
                Some("k-mismatch"),
                Some(json!({"productId": "p-1", "name": "Coffee", "price": "1.00", "stock": 1})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = app
            .send(
                "PUT",
                "/api/v1/products/p-1",
                Some("k-negative"),
                Some(json!({"productId": "p-1", "name": "Coffee", "price": "-1.00", "stock": 1})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn pull_endpoints() {
        let app = TestApp::new();
        app.seed_coffee_and_session().await;

        let (status, _, body) = app.send("GET", "/api/v1/sync/products", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (status, _, session) = app
            .send("GET", "/api/v1/sync/cash_sessions/s-1", None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["status"], "open");

        let (status, _, body) = app
            .send("GET", "/api/v1/sync/orders/missing", None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, _, _) = app.send("GET", "/api/v1/sync/widgets", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn commits_are_broadcast_and_replays_are_not() {
        let app = TestApp::new();
        let mut changes = app.state.event_bus.subscribe();
        let body = json!({"sessionId": "s-9", "openingFloat": "10"});

        app.send("POST", "/api/v1/cash-sessions", Some("open-9"), Some(body.clone()))
            .await;
        app.send("POST", "/api/v1/cash-sessions", Some("open-9"), Some(body))
            .await;

        let event = changes.try_recv().expect("broadcast after commit");
        assert_eq!(event.entity_id, "s-9");
        assert_eq!(event.data_type, Collection::CashSessions);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = TestApp::new();
        let (status, _, body) = app.send("GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
