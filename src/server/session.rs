//! The server-side RPC session.
//!
//! One [`RpcSession`] serves many logical clients inside a long-running
//! server process. Per client it owns a reverse (server-to-client) push
//! channel, a proxy-id list and an expiry timestamp; process-wide it owns the
//! method registry and the two supervisory loops (heartbeat broadcaster,
//! expiry sweeper) that run only while at least one connection is open.
//!
//! The HTTP server itself is an external collaborator: [`handle_channel`]
//! consumes the streamed response body as a plain byte sink, and
//! [`handle_post`] consumes POST bodies as bytes. See [`super::http`] for the
//! axum glue.
//!
//! [`handle_channel`]: RpcSession::handle_channel
//! [`handle_post`]: RpcSession::handle_post

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{Message, ProxyRef};

use super::connection::{spawn_push_writer, Connection, PushHandle};
use super::proxy::decode_parameters;
use super::registry::{HandlerResult, MethodRegistry, Parameter, ReturnValue};

/// Builder for configuring and creating an [`RpcSession`].
pub struct SessionBuilder {
    registry: MethodRegistry,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            config: SessionConfig::default(),
        }
    }

    /// Register a method handler. Registering a name twice keeps the second.
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Parameter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_fn(name, handler);
        self
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RpcSession {
        RpcSession {
            inner: Arc::new(Mutex::new(SessionState {
                session_id: uuid::Uuid::new_v4().to_string(),
                registry: self.registry,
                connections: HashMap::new(),
                next_proxy_id: 1,
                heartbeat_task: None,
                sweep_task: None,
            })),
            config: Arc::new(self.config),
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared mutable session state. All registry and connection mutation goes
/// through this one lock.
struct SessionState {
    session_id: String,
    registry: MethodRegistry,
    connections: HashMap<String, Connection>,
    next_proxy_id: u64,
    heartbeat_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl SessionState {
    /// Tear down one connection: drop it from the table, purge its proxy
    /// methods, stop its writer. Stops the supervisors when it was the last.
    fn remove_connection(&mut self, client_id: &str) {
        if let Some(conn) = self.connections.remove(client_id) {
            for proxy_id in &conn.proxies {
                self.registry.purge_proxy(*proxy_id);
            }
            conn.writer_task.abort();
            tracing::debug!(client_id, "connection removed");

            if self.connections.is_empty() {
                self.stop_supervisors();
            }
        }
    }

    fn stop_supervisors(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
        tracing::debug!("supervisors stopped");
    }
}

/// Server-side RPC session. Cheaply cloneable.
#[derive(Clone)]
pub struct RpcSession {
    inner: Arc<Mutex<SessionState>>,
    config: Arc<SessionConfig>,
}

impl RpcSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn new(config: SessionConfig) -> Self {
        SessionBuilder::new().config(config).build()
    }

    /// Register a method handler at runtime, replacing any existing one.
    pub async fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Vec<Parameter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.lock().await.registry.register_fn(name, handler);
    }

    /// Open a reverse channel over `sink` (the streamed GET response body).
    ///
    /// Spawns the connection's writer task, starts the supervisors if this is
    /// the first connection, and pushes the `ready` frame as the first bytes
    /// on the stream. Returns the generated client id.
    pub async fn handle_channel<W>(&self, sink: W) -> Result<String>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let client_id = uuid::Uuid::new_v4().to_string();

        let weak = Arc::downgrade(&self.inner);
        let cleanup_id = client_id.clone();
        let (push, writer_task) = spawn_push_writer(
            sink,
            self.config.push_capacity,
            self.config.max_frame_size,
            move || async move {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().await.remove_connection(&cleanup_id);
                }
            },
        );

        let session_id = {
            let mut state = self.inner.lock().await;
            state.connections.insert(
                client_id.clone(),
                Connection {
                    push: push.clone(),
                    proxies: Vec::new(),
                    expires_at: Instant::now() + self.config.expiry_window,
                    writer_task,
                },
            );
            if state.connections.len() == 1 {
                self.start_supervisors(&mut state);
            }
            tracing::debug!(client_id = %client_id, "connection opened");
            state.session_id.clone()
        };

        push.send(Message::Ready {
            client_id: client_id.clone(),
            session_id,
        })
        .await?;

        Ok(client_id)
    }

    /// Dispatch one client-to-server message (the POST body).
    ///
    /// Returns [`RpcError::NotConnected`] when the referenced client id has
    /// no live connection; the HTTP glue maps that to 500 "Not Connected".
    /// Malformed or misdirected messages are logged and dropped.
    pub async fn handle_post(&self, body: &[u8]) -> Result<()> {
        let message: Message = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping malformed message: {}", e);
                return Ok(());
            }
        };

        match message {
            Message::Heartbeat {
                client_id: Some(client_id),
            } => {
                let mut state = self.inner.lock().await;
                let conn = state
                    .connections
                    .get_mut(&client_id)
                    .ok_or(RpcError::NotConnected)?;
                conn.expires_at = Instant::now() + self.config.expiry_window;
                Ok(())
            }

            Message::Exit {
                client_id: Some(client_id),
            } => {
                let mut state = self.inner.lock().await;
                if !state.connections.contains_key(&client_id) {
                    return Err(RpcError::NotConnected);
                }
                state.remove_connection(&client_id);
                Ok(())
            }

            Message::Call {
                client_id,
                name,
                call_id,
                parameters,
            } => {
                let push = {
                    let state = self.inner.lock().await;
                    state
                        .connections
                        .get(&client_id)
                        .map(|conn| conn.push.clone())
                        .ok_or(RpcError::NotConnected)?
                };

                let session = self.clone();
                tokio::spawn(async move {
                    session
                        .dispatch_call(push, client_id, name, call_id, parameters)
                        .await;
                });
                Ok(())
            }

            other => {
                tracing::warn!("dropping misdirected message: {:?}", other);
                Ok(())
            }
        }
    }

    /// Invoke a registered method and push the correlated outcome frame.
    async fn dispatch_call(
        &self,
        push: PushHandle,
        client_id: String,
        name: String,
        call_id: u64,
        parameters: Vec<Value>,
    ) {
        let handler = { self.inner.lock().await.registry.get(&name) };

        let handler = match handler {
            Some(handler) => handler,
            None => {
                let reply = Message::MethodError {
                    call_id,
                    value: format!("No such method to call: {}", name),
                };
                if let Err(e) = push.send(reply).await {
                    tracing::debug!("could not deliver method error: {}", e);
                }
                return;
            }
        };

        let params = decode_parameters(parameters, &push);

        // Run the handler on its own task so a panic is contained and
        // reported like any other application error.
        let outcome = match tokio::spawn(handler.call(params)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(e.to_string()),
        };

        let reply = match outcome {
            Ok(ReturnValue::Value(value)) => Message::MethodResult { call_id, value },
            Ok(ReturnValue::Proxy(proxy)) => {
                let descriptor = {
                    let mut state = self.inner.lock().await;
                    let proxy_id = state.next_proxy_id;
                    state.next_proxy_id += 1;
                    let methods = state.registry.register_proxy(proxy_id, proxy);
                    match state.connections.get_mut(&client_id) {
                        Some(conn) => conn.proxies.push(proxy_id),
                        // Connection died while the handler ran.
                        None => state.registry.purge_proxy(proxy_id),
                    }
                    ProxyRef::new(proxy_id, methods)
                };
                Message::MethodResult {
                    call_id,
                    value: descriptor.to_value(),
                }
            }
            Err(value) => Message::MethodError { call_id, value },
        };

        if let Err(e) = push.send(reply).await {
            tracing::debug!("could not deliver call outcome: {}", e);
        }
    }

    /// Start the heartbeat broadcaster and the expiry sweeper.
    ///
    /// Both loops hold only a weak reference and exit on their own when the
    /// connection table empties; `remove_connection` additionally aborts them
    /// so no idle timer outlives the last connection.
    fn start_supervisors(&self, state: &mut SessionState) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.config.heartbeat_interval;
        state.heartbeat_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                let state = inner.lock().await;
                if state.connections.is_empty() {
                    break;
                }
                for (client_id, conn) in &state.connections {
                    if let Err(e) = conn.push.try_send(Message::Heartbeat { client_id: None }) {
                        tracing::debug!(client_id = %client_id, "heartbeat not queued: {}", e);
                    }
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        let interval = self.config.sweep_interval;
        state.sweep_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                let mut state = inner.lock().await;
                let now = Instant::now();
                let expired: Vec<String> = state
                    .connections
                    .iter()
                    .filter(|(_, conn)| conn.expires_at < now)
                    .map(|(id, _)| id.clone())
                    .collect();
                for client_id in expired {
                    tracing::debug!(client_id = %client_id, "connection expired");
                    state.remove_connection(&client_id);
                }
                if state.connections.is_empty() {
                    break;
                }
            }
        }));

        tracing::debug!("supervisors started");
    }

    /// Number of currently open connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Number of registered method names, proxy methods included.
    pub async fn method_count(&self) -> usize {
        self.inner.lock().await.registry.len()
    }
}
