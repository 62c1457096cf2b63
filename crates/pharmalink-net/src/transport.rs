//! Byte-level transport for the socket protocol.
//!
//! A [`Dialer`] turns a credential into a [`Link`]: a pair of channels
//! carrying text frames. The connection task only ever sees links, so the
//! WebSocket implementation can be swapped for an in-memory one in tests.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use pharmalink_shared::constants::CHANNEL_CAPACITY;
use pharmalink_shared::protocol::Packet;
use pharmalink_shared::{AuthError, Credential, TransportError};

use crate::error::ConnectionError;

/// An open, bidirectional stream of text frames.
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

impl Link {
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        self.outbound
            .send(packet.encode())
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next frame from the peer, `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

/// Opens links to the socket server.
pub trait Dialer: Send + Sync + 'static {
    fn dial(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Link, ConnectionError>> + Send;
}

/// Dials the Socket.IO endpoint over WebSocket (TLS via rustls).
#[derive(Debug, Clone)]
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Dialer for WsDialer {
    fn dial(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Link, ConnectionError>> + Send {
        let url = self.url.clone();
        let credential = credential.clone();

        async move {
            let mut request = url.as_str().into_client_request().map_err(|e| {
                TransportError::Unreachable(format!("invalid socket URL '{url}': {e}"))
            })?;

            let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
                .map_err(|_| AuthError::MalformedCredential("token is not a valid header".into()))?;
            request.headers_mut().insert("Authorization", bearer);

            let (stream, _response) = match tokio_tungstenite::connect_async(request).await {
                Ok(ok) => ok,
                Err(tokio_tungstenite::tungstenite::Error::Http(response))
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    return Err(AuthError::Rejected(format!(
                        "upgrade refused with status {}",
                        response.status()
                    ))
                    .into());
                }
                Err(e) => return Err(TransportError::Unreachable(e.to_string()).into()),
            };

            info!(url = %url, "WebSocket connected");

            let (mut sink, mut source) = stream.split();
            let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

            // Writer: drains outbound frames until the link owner drops its sender.
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        warn!(error = %e, "WebSocket write failed");
                        break;
                    }
                }
                let _ = sink.close().await;
                debug!("WebSocket writer finished");
            });

            // Reader: forwards text frames; the link closes when this task ends.
            tokio::spawn(async move {
                while let Some(msg) = source.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(text.to_string()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(frame = ?frame, "WebSocket closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "WebSocket read failed");
                            break;
                        }
                    }
                }
                debug!("WebSocket reader finished");
            });

            Ok::<_, ConnectionError>(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}

/// Derive the Socket.IO endpoint from an HTTP(S) service base URL.
pub fn socket_url_for(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    let ws = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    };
    format!("{ws}{}", pharmalink_shared::constants::SOCKET_PATH)
}
