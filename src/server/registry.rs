//! Method registry: maps method names to callable handlers.
//!
//! Plain methods are registered explicitly by server application code. Proxy
//! methods are registered dynamically under `"<proxyId>.<methodName>"` when a
//! handler returns a [`ProxyObject`](super::ProxyObject), and purged en masse
//! when the owning connection is destroyed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::proxy::{ProxyObject, RemoteCallback};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler produced; an `Err` becomes a `methodError` frame carrying
/// the string as-is.
pub type HandlerResult = std::result::Result<ReturnValue, String>;

/// One decoded positional call parameter.
#[derive(Clone)]
pub enum Parameter {
    /// A plain JSON value.
    Value(Value),
    /// A function argument the client exposed; invoking it pushes a
    /// `callback` frame to the originating connection.
    Callback(RemoteCallback),
}

impl Parameter {
    /// The JSON value, or `None` for a callback parameter.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Parameter::Value(v) => Some(v),
            Parameter::Callback(_) => None,
        }
    }

    /// The callback handle, or `None` for a plain value.
    pub fn as_callback(&self) -> Option<&RemoteCallback> {
        match self {
            Parameter::Callback(cb) => Some(cb),
            Parameter::Value(_) => None,
        }
    }
}

/// What a successful handler hands back across the boundary.
pub enum ReturnValue {
    /// A plain JSON value, returned directly inside `methodResult`.
    Value(Value),
    /// A live object; its methods get registered and a proxy descriptor is
    /// returned in its place.
    Proxy(ProxyObject),
}

impl ReturnValue {
    /// Convenience for handlers with nothing to return.
    pub fn null() -> Self {
        ReturnValue::Value(Value::Null)
    }
}

impl From<Value> for ReturnValue {
    fn from(value: Value) -> Self {
        ReturnValue::Value(value)
    }
}

impl From<ProxyObject> for ReturnValue {
    fn from(proxy: ProxyObject) -> Self {
        ReturnValue::Proxy(proxy)
    }
}

/// Trait for registered method implementations.
pub trait MethodHandler: Send + Sync + 'static {
    /// Invoke with decoded positional parameters.
    fn call(&self, parameters: Vec<Parameter>) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`MethodHandler`].
pub struct FnHandler<F> {
    handler: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Vec<Parameter>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Vec<Parameter>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, parameters: Vec<Parameter>) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(parameters))
    }
}

/// Registry mapping method names to handlers.
///
/// Registering a name that already exists silently overwrites the previous
/// handler.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any existing one.
    pub fn register(&mut self, name: &str, handler: Arc<dyn MethodHandler>) {
        self.methods.insert(name.to_string(), handler);
    }

    /// Register an async closure under `name`.
    pub fn register_fn<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Vec<Parameter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(handler)));
    }

    /// Look up a handler by method name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods.get(name).cloned()
    }

    /// Register every method of `proxy` under `"<proxy_id>.<name>"`.
    ///
    /// Returns the exposed method names for the wire descriptor, in
    /// registration order.
    pub fn register_proxy(&mut self, proxy_id: u64, proxy: ProxyObject) -> Vec<String> {
        let mut names = Vec::new();
        for (name, handler) in proxy.into_methods() {
            self.methods.insert(format!("{}.{}", proxy_id, name), handler);
            names.push(name);
        }
        names
    }

    /// Remove every entry registered for `proxy_id`.
    pub fn purge_proxy(&mut self, proxy_id: u64) {
        let prefix = format!("{}.", proxy_id);
        self.methods.retain(|name, _| !name.starts_with(&prefix));
    }

    /// Number of registered names (plain and proxy methods alike).
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
