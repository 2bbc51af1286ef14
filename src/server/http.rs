//! HTTP endpoint glue.
//!
//! The session itself only deals in byte sinks and message bodies; this
//! module mounts it on an axum router. `GET` opens the reverse channel and
//! streams it as the response body, `POST` delivers one client-to-server
//! message.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;

use crate::error::RpcError;

use super::session::RpcSession;

/// Content type of the streamed reverse channel.
pub const CONTENT_TYPE_RPC: &str = "application/x-shellfish-rpc";

/// Session-affinity header. Routing infrastructure in front of the endpoint
/// may use it to pin a client to one process; the session itself ignores it.
pub const SESSION_HEADER: &str = "x-shellfish-rpc-session";

/// Router exposing the RPC endpoint at `/`.
pub fn router(session: RpcSession) -> Router {
    Router::new()
        .route("/", get(open_channel).post(post_message))
        .with_state(session)
}

/// Serve `session` on `listener` until the server is shut down.
pub async fn serve(session: RpcSession, listener: TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(session)).await
}

async fn open_channel(State(session): State<RpcSession>) -> Response {
    let (sink, source) = tokio::io::duplex(64 * 1024);

    let client_id = match session.handle_channel(sink).await {
        Ok(client_id) => client_id,
        Err(e) => {
            tracing::error!("failed to open reverse channel: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    tracing::debug!(client_id = %client_id, "reverse channel streaming");

    // Content length stays unknown; the body streams until the connection
    // is torn down and the writer's sink half is dropped.
    let headers = [
        (header::CONTENT_TYPE, CONTENT_TYPE_RPC),
        (header::CONNECTION, "Keep-Alive"),
        (HeaderName::from_static("keep-alive"), "timeout=60"),
    ];
    (headers, Body::from_stream(ReaderStream::new(source))).into_response()
}

async fn post_message(State(session): State<RpcSession>, body: Bytes) -> Response {
    match session.handle_post(&body).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(RpcError::NotConnected) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Not Connected").into_response()
        }
        Err(e) => {
            tracing::warn!("post dispatch failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
