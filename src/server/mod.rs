//! Server side: session state, method registry, proxy marshaling and the
//! HTTP endpoint glue.

pub(crate) mod connection;
mod http;
mod proxy;
mod registry;
mod session;

pub use connection::PushHandle;
pub use http::{router, serve, CONTENT_TYPE_RPC, SESSION_HEADER};
pub use proxy::{ProxyObject, RemoteCallback};
pub use registry::{
    BoxFuture, FnHandler, HandlerResult, MethodHandler, MethodRegistry, Parameter, ReturnValue,
};
pub use session::{RpcSession, SessionBuilder};
