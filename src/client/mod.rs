//! Client side: the call proxy and its transport abstraction.

mod proxy;
mod transport;

pub use proxy::{Arg, CallbackFn, RemoteProxy, RpcClient};
pub use transport::{ChannelSource, ClientTransport, HttpTransport};
