use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

use crate::error::SessionError;

/// A bidirectional message socket
pub trait Socket:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

impl<T> Socket for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin
{
}

pub type BoxSocket = Box<dyn Socket>;

/// Opens sockets to the voice endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`. Resolves once the socket is open.
    async fn connect(&self, url: &str) -> Result<BoxSocket, SessionError>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<BoxSocket, SessionError> {
        info!("Connecting to voice endpoint at {}", redact_key(url));

        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        debug!("WebSocket upgrade complete (status={})", response.status());

        Ok(Box::new(stream))
    }
}

/// Build the connection URL carrying the API credential
pub fn endpoint_url(endpoint: &str, credential: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", endpoint, separator, credential)
}

/// Strip the query string so credentials never reach the logs
pub fn redact_key(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
