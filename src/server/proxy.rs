//! Proxy-object and callback marshaling, server side.
//!
//! [`ProxyObject`] is how a handler hands a live object back across the
//! boundary: methods are registered explicitly on the builder (there is no
//! reflection to walk), and the session turns the whole thing into a
//! `{type:"proxy", instance, methods}` descriptor on the wire.
//!
//! [`RemoteCallback`] is the server-side stand-in for a function argument the
//! client passed: invoking it pushes a `callback` frame to the originating
//! connection. Application code may hold it past the call that delivered it;
//! it stays valid until that connection dies.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::connection::PushHandle;
use super::registry::{FnHandler, HandlerResult, MethodHandler, Parameter};
use crate::error::Result;
use crate::protocol::{CallbackRef, Message};

/// A server object whose methods are exposed back to the client.
///
/// Methods keep their registration order in the wire descriptor.
#[derive(Default)]
pub struct ProxyObject {
    methods: Vec<(String, Arc<dyn MethodHandler>)>,
}

impl ProxyObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose an async closure as a remotely callable method.
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Vec<Parameter>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.methods
            .push((name.to_string(), Arc::new(FnHandler::new(handler))));
        self
    }

    /// Expose a pre-boxed handler.
    pub fn method_handler(mut self, name: &str, handler: Arc<dyn MethodHandler>) -> Self {
        self.methods.push((name.to_string(), handler));
        self
    }

    /// Exposed method names, in registration order.
    pub fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|(name, _)| name.clone()).collect()
    }

    pub(crate) fn into_methods(self) -> Vec<(String, Arc<dyn MethodHandler>)> {
        self.methods
    }
}

/// Dispatch handle for a client-registered callback.
#[derive(Clone)]
pub struct RemoteCallback {
    id: u64,
    push: PushHandle,
}

impl RemoteCallback {
    pub(crate) fn new(id: u64, push: PushHandle) -> Self {
        Self { id, push }
    }

    /// The client-assigned callback id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Push a `callback` frame carrying `parameters` to the client.
    pub async fn invoke(&self, parameters: Vec<Value>) -> Result<()> {
        self.push
            .send(Message::Callback {
                callback: self.id,
                parameters,
            })
            .await
    }
}

/// Decode raw call parameters, replacing callback placeholders with live
/// dispatch handles bound to the originating connection.
pub(crate) fn decode_parameters(raw: Vec<Value>, push: &PushHandle) -> Vec<Parameter> {
    raw.into_iter()
        .map(|value| match CallbackRef::from_value(&value) {
            Some(marker) => {
                Parameter::Callback(RemoteCallback::new(marker.safe_callback, push.clone()))
            }
            None => Parameter::Value(value),
        })
        .collect()
}
