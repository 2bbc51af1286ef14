//! Client-side transport abstraction.
//!
//! [`RpcClient`](super::RpcClient) only needs two primitives: deliver one
//! message body upstream, and open the streamed reverse channel. Production
//! code uses [`HttpTransport`]; tests substitute in-memory implementations.

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::{Result, RpcError};
use crate::server::SESSION_HEADER;

/// Streamed reverse-channel byte source.
pub type ChannelSource = Box<dyn AsyncRead + Send + Unpin>;

/// How the client reaches the server.
#[async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// Deliver one encoded client-to-server message.
    ///
    /// Returns [`RpcError::NotConnected`] when the server no longer knows
    /// the referenced client id.
    async fn post(&self, body: Vec<u8>) -> Result<()>;

    /// Open the reverse channel and hand back its byte source.
    async fn open_channel(&self) -> Result<ChannelSource>;
}

/// HTTP transport: `POST` for upstream messages, a long-lived `GET` response
/// body for the reverse channel.
pub struct HttpTransport {
    endpoint: String,
    session: Option<String>,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session: None,
            http: reqwest::Client::new(),
        }
    }

    /// Attach a session-affinity token, sent as `x-shellfish-rpc-session` on
    /// every request.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session {
            Some(session) => builder.header(SESSION_HEADER, session.as_str()),
            None => builder,
        }
    }
}

#[async_trait]
impl ClientTransport for HttpTransport {
    async fn post(&self, body: Vec<u8>) -> Result<()> {
        let response = self
            .request(self.http.post(&self.endpoint))
            .body(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if text == "Not Connected" {
            Err(RpcError::NotConnected)
        } else {
            Err(RpcError::Protocol(format!("post rejected: {}", text)))
        }
    }

    async fn open_channel(&self) -> Result<ChannelSource> {
        let response = self
            .request(self.http.get(&self.endpoint))
            .send()
            .await?
            .error_for_status()?;

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)))
    }
}
