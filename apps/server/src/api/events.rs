//! Server-Sent Events change stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use tillsync_core::events::CHANGE_EVENT_NAME;
use tillsync_core::sync::PUSH_KEEP_ALIVE_SECS;

use crate::main_lib::AppState;

async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.event_bus.subscribe();
    debug!("Change stream opened");

    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(change) => match Event::default().event(CHANGE_EVENT_NAME).json_data(&change) {
                    Ok(event) => return Some((Ok(event), receiver)),
                    Err(err) => warn!("Skipping unserializable change event: {}", err),
                },
                // End the stream; the client reconnects and reconciles.
                Err(RecvError::Lagged(missed)) => {
                    warn!("Change stream lagged by {} events, closing", missed);
                    return None;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(PUSH_KEEP_ALIVE_SECS)),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(event_stream))
}
