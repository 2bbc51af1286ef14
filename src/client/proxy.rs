//! The client-side RPC proxy.
//!
//! [`RpcClient`] connects lazily: the first call opens the reverse channel,
//! and calls issued before the server's `ready` frame arrives are queued and
//! flushed in order once the client id is known. Completion frames are
//! matched to waiting callers by call id, so calls resolve in whatever order
//! the server finishes them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{CallbackRef, FrameDecoder, Message, ProxyRef};

use super::transport::{ChannelSource, ClientTransport};

// Process-wide id spaces. Call ids and callback ids never collide because
// they live in different wire fields, but each space stays monotonic across
// every client in the process.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// A function the client exposes to the server for the lifetime of the
/// connection.
pub type CallbackFn = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// One positional call argument.
pub enum Arg {
    /// A plain JSON value.
    Value(Value),
    /// A local function, marshaled as a callback placeholder the server can
    /// invoke for as long as the connection lives.
    Callback(CallbackFn),
}

impl Arg {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Arg::Callback(Arc::new(f))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

/// Argument with callbacks already pinned to an id, held while the call
/// waits in the pre-`ready` queue.
enum MarshaledArg {
    Value(Value),
    Callback(u64),
}

impl MarshaledArg {
    fn materialize(&self, client_id: &str) -> Value {
        match self {
            MarshaledArg::Value(value) => value.clone(),
            MarshaledArg::Callback(id) => {
                CallbackRef::new(Some(client_id.to_string()), *id).to_value()
            }
        }
    }
}

struct QueuedCall {
    call_id: u64,
    name: String,
    parameters: Vec<MarshaledArg>,
}

struct ClientState {
    client_id: Option<String>,
    session_id: Option<String>,
    pending: HashMap<u64, oneshot::Sender<Result<Value>>>,
    callbacks: HashMap<u64, CallbackFn>,
    queued: VecDeque<QueuedCall>,
    reader_task: Option<JoinHandle<()>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            client_id: None,
            session_id: None,
            pending: HashMap::new(),
            callbacks: HashMap::new(),
            queued: VecDeque::new(),
            reader_task: None,
        }
    }
}

/// Client-side proxy for one logical connection. Cheaply cloneable.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Mutex<ClientState>>,
    transport: Arc<dyn ClientTransport>,
    config: Arc<ClientConfig>,
}

impl RpcClient {
    pub fn new(transport: impl ClientTransport) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: impl ClientTransport, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClientState::new())),
            transport: Arc::new(transport),
            config: Arc::new(config),
        }
    }

    /// The server-assigned client id, once `ready` has arrived.
    pub async fn client_id(&self) -> Option<String> {
        self.inner.lock().await.client_id.clone()
    }

    /// The server's session id, once `ready` has arrived.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }

    /// Open the reverse channel if it is not already open.
    ///
    /// Calls do this on demand; connecting eagerly merely front-loads the
    /// transport round trip.
    pub async fn connect(&self) -> Result<()> {
        {
            let state = self.inner.lock().await;
            if state.reader_task.is_some() {
                return Ok(());
            }
        }

        let source = self.transport.open_channel().await?;

        let mut state = self.inner.lock().await;
        // Lost a connect race; the extra stream is dropped here.
        if state.reader_task.is_some() {
            return Ok(());
        }
        let client = self.clone();
        state.reader_task = Some(tokio::spawn(async move {
            client.read_loop(source).await;
        }));
        Ok(())
    }

    /// Invoke a remote method and wait for its outcome.
    ///
    /// Resolves with the `methodResult` value, or fails with
    /// [`RpcError::Remote`] carrying the server's `methodError` string.
    pub async fn call(&self, name: &str, args: Vec<Arg>) -> Result<Value> {
        self.connect().await?;

        let call_id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let (send_now, callbacks_for_call) = {
            let mut state = self.inner.lock().await;
            let parameters: Vec<MarshaledArg> = args
                .into_iter()
                .map(|arg| match arg {
                    Arg::Value(value) => MarshaledArg::Value(value),
                    Arg::Callback(f) => {
                        let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
                        state.callbacks.insert(id, f);
                        MarshaledArg::Callback(id)
                    }
                })
                .collect();
            let callbacks_for_call = marshaled_callback_ids(&parameters);
            state.pending.insert(call_id, tx);

            let send_now = match state.client_id.clone() {
                Some(client_id) => Some(build_call(&client_id, name, call_id, &parameters)),
                None => {
                    // Channel is opening but `ready` has not arrived yet.
                    state.queued.push_back(QueuedCall {
                        call_id,
                        name: name.to_string(),
                        parameters,
                    });
                    None
                }
            };
            (send_now, callbacks_for_call)
        };

        if let Some(message) = send_now {
            if let Err(e) = self.post(&message).await {
                self.abandon_call(call_id, &callbacks_for_call).await;
                return Err(e);
            }
        }

        rx.await.map_err(|_| RpcError::ChannelClosed)?
    }

    /// Materialize a proxy handle from a `methodResult` value, if the value
    /// is a proxy descriptor.
    pub fn proxy(&self, value: &Value) -> Option<RemoteProxy> {
        ProxyRef::from_value(value).map(|descriptor| RemoteProxy {
            instance: descriptor.instance,
            methods: descriptor.methods,
            client: self.clone(),
        })
    }

    /// Tell the server to drop this connection, then reset local state.
    /// Outstanding calls fail with [`RpcError::ChannelClosed`].
    pub async fn close(&self) -> Result<()> {
        let (client_id, reader_task) = {
            let mut state = self.inner.lock().await;
            (state.client_id.clone(), state.reader_task.take())
        };

        if let Some(task) = reader_task {
            task.abort();
        }
        if let Some(client_id) = client_id {
            // Best effort; the server may already have swept us.
            let exit = Message::Exit {
                client_id: Some(client_id),
            };
            if let Err(e) = self.post(&exit).await {
                tracing::debug!("exit not delivered: {}", e);
            }
        }

        self.handle_disconnect().await;
        Ok(())
    }

    async fn post(&self, message: &Message) -> Result<()> {
        self.transport.post(serde_json::to_vec(message)?).await
    }

    async fn read_loop(&self, mut source: ChannelSource) {
        let mut decoder = FrameDecoder::with_max_frame_size(self.config.max_frame_size);
        let mut buf = vec![0u8; self.config.read_buffer_size];

        'outer: loop {
            let chunk = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => &buf[..n],
                Err(e) => {
                    tracing::debug!("reverse channel read failed: {}", e);
                    break;
                }
            };
            let messages = match decoder.push(chunk) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!("reverse channel framing error: {}", e);
                    break;
                }
            };
            for message in messages {
                if !self.handle_push(message).await {
                    break 'outer;
                }
            }
        }

        self.handle_disconnect().await;
    }

    /// Dispatch one server-to-client frame. Returns `false` when the channel
    /// should be torn down.
    async fn handle_push(&self, message: Message) -> bool {
        match message {
            Message::Ready {
                client_id,
                session_id,
            } => {
                tracing::debug!(client_id = %client_id, "channel ready");
                let flush = {
                    let mut state = self.inner.lock().await;
                    state.client_id = Some(client_id.clone());
                    state.session_id = Some(session_id);
                    state
                        .queued
                        .drain(..)
                        .map(|call| {
                            (
                                call.call_id,
                                marshaled_callback_ids(&call.parameters),
                                build_call(&client_id, &call.name, call.call_id, &call.parameters),
                            )
                        })
                        .collect::<Vec<_>>()
                };
                for (call_id, callbacks_for_call, message) in flush {
                    if let Err(e) = self.post(&message).await {
                        if let Some(tx) = self.abandon_call(call_id, &callbacks_for_call).await {
                            let _ = tx.send(Err(e));
                        }
                    }
                }
                true
            }

            Message::Heartbeat { client_id: None } => {
                let pong = self.inner.lock().await.client_id.clone().map(|client_id| {
                    Message::Heartbeat {
                        client_id: Some(client_id),
                    }
                });
                if let Some(pong) = pong {
                    if let Err(e) = self.post(&pong).await {
                        tracing::debug!("heartbeat pong not delivered: {}", e);
                    }
                }
                true
            }

            Message::MethodResult { call_id, value } => {
                self.complete(call_id, Ok(value)).await;
                true
            }

            Message::MethodError { call_id, value } => {
                self.complete(call_id, Err(RpcError::Remote(value))).await;
                true
            }

            Message::Callback {
                callback,
                parameters,
            } => {
                let f = self.inner.lock().await.callbacks.get(&callback).cloned();
                match f {
                    Some(f) => f(parameters),
                    None => tracing::warn!(callback, "callback id unknown"),
                }
                true
            }

            Message::Exit { .. } => {
                tracing::debug!("server closed the connection");
                false
            }

            other => {
                tracing::warn!("dropping misdirected message: {:?}", other);
                true
            }
        }
    }

    /// Forget a call whose `call` message could not be delivered, dropping
    /// the callback handles registered for it. Returns the completion sender
    /// if the call was still pending.
    async fn abandon_call(
        &self,
        call_id: u64,
        callback_ids: &[u64],
    ) -> Option<oneshot::Sender<Result<Value>>> {
        let mut state = self.inner.lock().await;
        for id in callback_ids {
            state.callbacks.remove(id);
        }
        state.pending.remove(&call_id)
    }

    async fn complete(&self, call_id: u64, outcome: Result<Value>) {
        match self.inner.lock().await.pending.remove(&call_id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(call_id, "completion for unknown call"),
        }
    }

    /// Reset to the disconnected state: forget the client id and callbacks,
    /// fail everything in flight.
    async fn handle_disconnect(&self) {
        let mut state = self.inner.lock().await;
        state.client_id = None;
        state.session_id = None;
        state.callbacks.clear();
        state.queued.clear();
        state.reader_task.take();
        for (_, tx) in state.pending.drain() {
            let _ = tx.send(Err(RpcError::ChannelClosed));
        }
        tracing::debug!("client state reset");
    }
}

fn marshaled_callback_ids(parameters: &[MarshaledArg]) -> Vec<u64> {
    parameters
        .iter()
        .filter_map(|arg| match arg {
            MarshaledArg::Callback(id) => Some(*id),
            MarshaledArg::Value(_) => None,
        })
        .collect()
}

fn build_call(client_id: &str, name: &str, call_id: u64, parameters: &[MarshaledArg]) -> Message {
    Message::Call {
        client_id: client_id.to_string(),
        name: name.to_string(),
        call_id,
        parameters: parameters
            .iter()
            .map(|arg| arg.materialize(client_id))
            .collect(),
    }
}

/// Handle for a server-returned proxy object.
///
/// Method calls go through the owning [`RpcClient`] under the
/// `"<instance>.<method>"` names the server registered.
pub struct RemoteProxy {
    instance: u64,
    methods: Vec<String>,
    client: RpcClient,
}

impl RemoteProxy {
    /// The server-assigned instance id.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Methods the server exposed on this instance.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub async fn call(&self, method: &str, args: Vec<Arg>) -> Result<Value> {
        if !self.methods.iter().any(|m| m == method) {
            return Err(RpcError::Protocol(format!(
                "no such proxy method: {}",
                method
            )));
        }
        self.client
            .call(&format!("{}.{}", self.instance, method), args)
            .await
    }
}
