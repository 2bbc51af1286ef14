//! pushrpc - bidirectional RPC over plain HTTP.
//!
//! A server process exposes registered methods on one endpoint. A client
//! opens the endpoint with a `GET` whose response body never ends: that
//! stream is the server-to-client push channel, carrying length-prefixed
//! JSON frames. Everything the client sends travels as individual `POST`
//! requests. On top of that transport sit correlated calls, callback
//! arguments the server can invoke remotely, live proxy objects returned by
//! handlers, and a heartbeat/expiry lifecycle that reclaims silent clients.
//!
//! # Server
//!
//! ```no_run
//! use pushrpc::server::{self, ReturnValue, RpcSession};
//! use serde_json::json;
//!
//! # async fn run() -> std::io::Result<()> {
//! let session = RpcSession::builder()
//!     .method("greet", |params| async move {
//!         let name = params[0].as_value().and_then(|v| v.as_str()).unwrap_or("world");
//!         Ok(ReturnValue::Value(json!(format!("hello, {}", name))))
//!     })
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8090").await?;
//! server::serve(session, listener).await
//! # }
//! ```
//!
//! # Client
//!
//! ```no_run
//! use pushrpc::client::{HttpTransport, RpcClient};
//! use serde_json::json;
//!
//! # async fn run() -> pushrpc::Result<()> {
//! let client = RpcClient::new(HttpTransport::new("http://127.0.0.1:8090/"));
//! let greeting = client.call("greet", vec![json!("rpc").into()]).await?;
//! println!("{}", greeting);
//! client.close().await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use config::{ClientConfig, SessionConfig};
pub use error::{Result, RpcError};
