//! Relay connectors
//!
//! A [`RelayConnector`] opens one link to the relay: a sink for outbound
//! text frames and a stream of inbound text frames. The stream ending (or
//! yielding an error) means the link is closed.

use crate::{Error, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use url::Url;

/// Outbound half of a relay link
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a relay link
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established relay link
pub struct RelayLink {
    /// Outbound text frames
    pub sink: FrameSink,
    /// Inbound text frames
    pub stream: FrameStream,
}

/// Opens links to the relay endpoint
#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    /// Establish a link to `url`
    async fn connect(&self, url: &Url) -> Result<RelayLink>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<RelayLink> {
        info!("Connecting to relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to connect to relay: {}", e)))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(Error::from)
            .with(|text: String| async move { Ok::<_, Error>(Message::Text(text)) });

        let stream = read.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("Dropping non UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => Some(Err(Error::ConnectionClosed(format!(
                    "relay closed the connection: {:?}",
                    frame
                )))),
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            }
        });

        Ok(RelayLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
