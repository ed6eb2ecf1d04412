use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use liblarder::identity::identity_key;
use liblarder::registry::Connection;

use crate::service::{AppState, authorize};

/// `GET /api/events` — the long-lived change-notification stream.
///
/// The request authenticates with the household bearer credential; the
/// identity key is derived from the subject plus the caller's origin and
/// user-agent so a reloaded tab replaces its own stale stream instead of
/// accumulating sockets.
pub async fn stream_events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match authorize(&state, &headers) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "event stream handshake rejected");
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, e.to_string()).into_response();
        }
    };

    let origin = header_str(&headers, header::ORIGIN);
    let agent = header_str(&headers, header::USER_AGENT);
    let key = identity_key(&claims.subject, origin, agent);

    let (conn, mut frames) = Connection::new(key, state.hub.config().channel_capacity);
    let cancel = conn.cancel_token();
    let connection_id = state.hub.on_connect(Arc::clone(&conn));
    info!(connection = %connection_id, subject = %claims.subject, "event stream connected");

    // Pump frames from the hub's channel into the response body. Ends when
    // the connection is evicted (token cancelled), the registry entry is
    // dropped (sender side gone), or the remote closes the response.
    let registry = Arc::clone(state.hub.registry());
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = frames.recv() => {
                    let Some(frame) = maybe else { break };
                    if body_tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }
        registry.remove(&connection_id);
        debug!(connection = %connection_id, "event stream closed");
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(body_rx)),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}
