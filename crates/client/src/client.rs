//! HTTP client for the POS server API.
//!
//! Mutations are sent with their idempotency key; pull endpoints return the
//! current server snapshot of a collection or entity.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use tillsync_core::entities::Collection;
use tillsync_core::idempotency::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAY_HEADER};
use tillsync_core::operations::HttpMethod;
use tillsync_core::sync::{DeliveryOutcome, PendingOperation};

use crate::config::SyncConfig;
use crate::error::{ClientError, Result};

const MAX_LOG_BODY_CHARS: usize = 512;
const PUSH_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

/// Network seam used by the orchestrator.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send a queued operation with its idempotency key. Every failure is
    /// folded into the returned outcome.
    async fn deliver(&self, operation: &PendingOperation) -> DeliveryOutcome;

    async fn fetch_collection(&self, collection: Collection) -> Result<Vec<Value>>;

    /// `Ok(None)` when the server does not know the entity.
    async fn fetch_entity(&self, collection: Collection, entity_id: &str)
        -> Result<Option<Value>>;
}

#[derive(Debug, Clone)]
pub struct PosApiClient {
    client: reqwest::Client,
    /// No overall timeout: the push channel stays open indefinitely.
    push_client: reqwest::Client,
    base_url: String,
}

impl PosApiClient {
    /// Create a client whose requests are bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let push_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(PUSH_CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            push_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(&config.base_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    fn api_error(status: StatusCode, body: &str) -> ClientError {
        match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(error) => ClientError::api(status.as_u16(), error.code, error.message),
            Err(_) => ClientError::api(
                status.as_u16(),
                "HTTP_ERROR",
                format!("Request failed: {}", body),
            ),
        }
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            ClientError::Json(e)
        })
    }

    /// Send one mutation. Returns the server result and whether it was a
    /// replay of an earlier execution.
    pub async fn send_operation(&self, operation: &PendingOperation) -> Result<(Value, bool)> {
        let body = operation.payload.body()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(&operation.idempotency_key)
            .map_err(|_| ClientError::invalid_request("Invalid idempotency key format"))?;
        headers.insert(IDEMPOTENCY_KEY_HEADER, key);

        let method = match operation.method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        };

        debug!(
            "[Sync] {} {} key={}",
            operation.method.as_str(),
            operation.target_endpoint,
            operation.idempotency_key
        );
        let response = self
            .client
            .request(method, self.url(&operation.target_endpoint))
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let replayed = response
            .headers()
            .get(IDEMPOTENT_REPLAY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let text = response.text().await?;
        Self::log_response(status, &text);

        if !status.is_success() {
            return Err(Self::api_error(status, &text));
        }

        // A 2xx means the operation committed even if the body is unreadable.
        let result = serde_json::from_str(&text).unwrap_or(Value::Null);
        Ok((result, replayed))
    }

    /// Open the server's change stream.
    pub async fn open_event_stream(&self) -> Result<reqwest::Response> {
        let response = self
            .push_client
            .get(self.url("/api/v1/events"))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::api_error(status, &body));
        }
        Ok(response)
    }

    pub async fn check_health(&self) -> Result<()> {
        let response = self.client.get(self.url("/api/v1/health")).send().await?;
        let _: Value = Self::parse_response(response).await?;
        Ok(())
    }
}

/// Map a failed send to a delivery outcome.
fn outcome_for_error(err: ClientError) -> DeliveryOutcome {
    if err.retry_class().keeps_operation() {
        return DeliveryOutcome::Transient {
            reason: err.to_string(),
        };
    }
    match err {
        ClientError::Api {
            status,
            code,
            message,
        } => DeliveryOutcome::Rejected {
            status,
            code,
            message,
        },
        other => DeliveryOutcome::Rejected {
            status: 0,
            code: "INVALID_REQUEST".to_string(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl SyncTransport for PosApiClient {
    async fn deliver(&self, operation: &PendingOperation) -> DeliveryOutcome {
        match self.send_operation(operation).await {
            Ok((result, replayed)) => DeliveryOutcome::Delivered { replayed, result },
            Err(err) => outcome_for_error(err),
        }
    }

    async fn fetch_collection(&self, collection: Collection) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/sync/{}", collection.as_str())))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn fetch_entity(
        &self,
        collection: Collection,
        entity_id: &str,
    ) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url(&format!(
                "/api/v1/sync/{}/{}",
                collection.as_str(),
                entity_id
            )))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};
    use tillsync_core::operations::{OperationPayload, SessionOpenInput};
    use tillsync_core::sync::NewPendingOperation;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Status, body, replay marker and delay before answering.
    type Reply = (u16, &'static str, bool, u64);

    #[derive(Debug, Clone)]
    struct Seen {
        line: String,
        key: Option<String>,
    }

    async fn read_request(stream: &mut TcpStream) -> Option<Seen> {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 2048];
        let head_end = loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let header = |name: &str| {
            head.lines().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(name)
                    .then(|| value.trim().to_string())
            })
        };

        // Drain the body so closing the socket does not reset the client.
        let body_len: usize = header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut have = buf.len() - head_end;
        while have < body_len {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            have += n;
        }

        Some(Seen {
            line: head.lines().next()?.to_string(),
            key: header("idempotency-key"),
        })
    }

    /// Answers connections one at a time with the scripted replies.
    async fn scripted_server(replies: Vec<Reply>) -> (String, Arc<Mutex<Vec<Seen>>>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        let handle = tokio::spawn(async move {
            let mut replies = replies.into_iter();
            while let Ok((mut stream, _)) = listener.accept().await {
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                log.lock().expect("log").push(request);
                let (status, body, replayed, delay_ms) = replies.next().unwrap_or((
                    500,
                    r#"{"code":"INTERNAL","message":"unscripted request"}"#,
                    false,
                    0,
                ));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let marker = if replayed {
                    "x-idempotent-replayed: true\r\n"
                } else {
                    ""
                };
                let raw = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\n{}content-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    marker,
                    body.len(),
                    body
                );
                let _ = stream.write_all(raw.as_bytes()).await;
            }
        });

        (base_url, seen, handle)
    }

    fn requests(seen: &Mutex<Vec<Seen>>) -> Vec<Seen> {
        seen.lock().expect("log").clone()
    }

    fn pending_open_session() -> PendingOperation {
        let new = NewPendingOperation::from_payload(
            OperationPayload::SessionOpen(SessionOpenInput {
                session_id: "s-1".to_string(),
                opening_float: dec!(50),
            }),
            Utc::now(),
        )
        .expect("new op");
        PendingOperation {
            id: 1,
            idempotency_key: new.idempotency_key,
            operation_type: new.operation_type,
            stream_key: new.stream_key,
            method: new.method,
            target_endpoint: new.target_endpoint,
            payload: new.payload,
            enqueued_at: new.enqueued_at,
            retry_count: 0,
            next_attempt_at: None,
            first_attempt_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn deliver_sends_key_and_reads_replay_marker() {
        let (base_url, seen, server) = scripted_server(vec![
            (201, r#"{"id":"s-1","status":"open"}"#, false, 0),
            (201, r#"{"id":"s-1","status":"open"}"#, true, 0),
        ])
        .await;
        let client = PosApiClient::new(&base_url, Duration::from_secs(5)).expect("client");
        let op = pending_open_session();

        let first = client.deliver(&op).await;
        let second = client.deliver(&op).await;

        assert_eq!(
            first,
            DeliveryOutcome::Delivered {
                replayed: false,
                result: serde_json::json!({"id": "s-1", "status": "open"}),
            }
        );
        assert!(matches!(
            second,
            DeliveryOutcome::Delivered { replayed: true, .. }
        ));

        let requests = requests(&seen);
        assert_eq!(requests.len(), 2);
        assert!(requests[0].line.starts_with("POST /api/v1/cash-sessions "));
        for request in &requests {
            assert_eq!(request.key.as_deref(), Some(op.idempotency_key.as_str()));
        }
        server.abort();
    }

    #[tokio::test]
    async fn deliver_classifies_rejections_and_server_errors() {
        let (base_url, _seen, server) = scripted_server(vec![
            (
                422,
                r#"{"code":"SESSION_NOT_OPEN","message":"Cash session s-1 is not open"}"#,
                false,
                0,
            ),
            (503, r#"{"code":"DATABASE_BUSY","message":"busy"}"#, false, 0),
        ])
        .await;
        let client = PosApiClient::new(&base_url, Duration::from_secs(5)).expect("client");
        let op = pending_open_session();

        assert_eq!(
            client.deliver(&op).await,
            DeliveryOutcome::Rejected {
                status: 422,
                code: "SESSION_NOT_OPEN".to_string(),
                message: "Cash session s-1 is not open".to_string(),
            }
        );
        assert!(matches!(
            client.deliver(&op).await,
            DeliveryOutcome::Transient { .. }
        ));
        server.abort();
    }

    #[tokio::test]
    async fn timeout_is_an_unknown_outcome() {
        let (base_url, _seen, server) =
            scripted_server(vec![(201, r#"{"id":"s-1"}"#, false, 1_000)]).await;
        let client = PosApiClient::new(&base_url, Duration::from_millis(150)).expect("client");

        assert!(matches!(
            client.deliver(&pending_open_session()).await,
            DeliveryOutcome::Transient { .. }
        ));
        server.abort();
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client =
            PosApiClient::new(&format!("http://{}", addr), Duration::from_secs(1)).expect("client");

        assert!(matches!(
            client.deliver(&pending_open_session()).await,
            DeliveryOutcome::Transient { .. }
        ));
    }

    #[tokio::test]
    async fn pull_endpoints_return_snapshots() {
        let (base_url, seen, server) = scripted_server(vec![
            (200, r#"[{"id":"p-1","price":"2.50"}]"#, false, 0),
            (404, r#"{"code":"NOT_FOUND","message":"missing"}"#, false, 0),
        ])
        .await;
        let client = PosApiClient::new(&base_url, Duration::from_secs(5)).expect("client");

        let items = client
            .fetch_collection(Collection::Products)
            .await
            .expect("collection");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["price"], "2.50");

        let missing = client
            .fetch_entity(Collection::Orders, "o-9")
            .await
            .expect("entity");
        assert!(missing.is_none());

        let requests = requests(&seen);
        assert!(requests[0].line.starts_with("GET /api/v1/sync/products "));
        assert!(requests[1].line.starts_with("GET /api/v1/sync/orders/o-9 "));
        server.abort();
    }
}
