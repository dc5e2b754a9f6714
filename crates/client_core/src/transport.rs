use async_trait::async_trait;
use futures::StreamExt;
use shared::protocol::{ClientCommand, ServerEvent};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};
use url::Url;

use crate::connection::{PushSession, PushTransport};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("server url must use http or https, got {0}")]
    UnsupportedScheme(String),
}

/// Push transport over a websocket at `/events` on the dashboard API
/// server. Frames are JSON-encoded `ServerEvent`s / `ClientCommand`s.
pub struct WebSocketTransport {
    events_url: String,
}

impl WebSocketTransport {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            events_url: events_url_for(server_url)?,
        })
    }
}

fn events_url_for(server_url: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(server_url)?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::UnsupportedScheme(server_url.to_string()))?;
    url.set_path("/events");
    Ok(url.to_string())
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn open(&self) -> anyhow::Result<Box<dyn PushSession>> {
        let (stream, _) = connect_async(&self.events_url).await?;
        info!(url = %self.events_url, "websocket push channel opened");
        Ok(Box::new(WebSocketSession { stream }))
    }
}

struct WebSocketSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushSession for WebSocketSession {
    async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => return Some(event),
                    Err(err) => {
                        warn!(error = %err, "dropping invalid server event frame");
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "websocket receive failed");
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, command: ClientCommand) -> anyhow::Result<()> {
        use futures::SinkExt;
        let frame = serde_json::to_string(&command)?;
        self.stream.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
