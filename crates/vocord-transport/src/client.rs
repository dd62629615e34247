use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::protocol::{ClientEvent, ServerEvent};
use vocord_foundation::TransportError;
use vocord_telemetry::PipelineMetrics;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 64,
            inbound_capacity: 256,
        }
    }
}

/// What the network task delivers to the engine. `Disconnected` is always the
/// final message before the task exits.
#[derive(Debug)]
pub enum InboundEvent {
    Event(ServerEvent),
    Disconnected(String),
}

/// A live realtime connection. Dropping `outbound` tells the network task to
/// send a Close frame and wind down.
pub struct RealtimeConnection {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub events: mpsc::Receiver<InboundEvent>,
    pub task: JoinHandle<()>,
}

impl RealtimeConnection {
    pub async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Graceful shutdown: close the outbound side, then wait briefly for the
    /// network task to finish its Close handshake.
    pub async fn close(self) {
        let RealtimeConnection { outbound, task, .. } = self;
        drop(outbound);
        if timeout(Duration::from_secs(2), task).await.is_err() {
            tracing::warn!("Network task did not exit within close timeout");
        }
    }
}

/// Seam between the engine and the wire, so tests can substitute a scripted
/// transport.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self, token: &str) -> Result<RealtimeConnection, TransportError>;
}

/// Production transport over tokio-tungstenite with rustls.
pub struct WsTransport {
    config: TransportConfig,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self, token: &str) -> Result<RealtimeConnection, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let bearer = format!("Bearer {}", token)
            .parse()
            .map_err(|_| TransportError::Handshake("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.config.connect_timeout))??;

        tracing::info!("WebSocket connected: {}", self.config.url);

        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_capacity);
        let (in_tx, in_rx) = mpsc::channel(self.config.inbound_capacity);
        let metrics = self.metrics.clone();

        let task = tokio::spawn(async move {
            run_socket(stream, out_rx, in_tx, metrics).await;
        });

        Ok(RealtimeConnection {
            outbound: out_tx,
            events: in_rx,
            task,
        })
    }
}

/// The one task that owns the socket: serializes outbound events, parses
/// inbound frames, answers pings. Exits after delivering `Disconnected` or
/// after the outbound side is dropped.
async fn run_socket(
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut out_rx: mpsc::Receiver<ClientEvent>,
    in_tx: mpsc::Sender<InboundEvent>,
    metrics: Option<Arc<PipelineMetrics>>,
) {
    let disconnect_reason = loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("Failed to serialize client event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws.send(Message::text(json)).await {
                        break format!("send failed: {}", e);
                    }
                    if let Some(m) = &metrics {
                        m.transport_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    // Engine dropped the connection handle
                    let _ = ws.close(None).await;
                    tracing::debug!("Outbound channel closed; socket shut down");
                    return;
                }
            },
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(txt))) => {
                    handle_text(txt.as_str(), &in_tx, &metrics);
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        break format!("pong failed: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => format!("closed by server: {}", f.reason),
                        None => "closed by server".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("socket error: {}", e),
                None => break "connection closed".to_string(),
            },
        }
    };

    tracing::info!("WebSocket disconnected: {}", disconnect_reason);
    let _ = in_tx.send(InboundEvent::Disconnected(disconnect_reason)).await;
}

fn handle_text(
    txt: &str,
    in_tx: &mpsc::Sender<InboundEvent>,
    metrics: &Option<Arc<PipelineMetrics>>,
) {
    let event = match serde_json::from_str::<ServerEvent>(txt) {
        Ok(ev) => ev,
        Err(e) => {
            // Malformed messages are dropped; the session continues.
            tracing::warn!("Malformed server message: {}", e);
            if let Some(m) = metrics {
                m.transport_malformed.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
    };

    if let Some(m) = metrics {
        m.transport_received.fetch_add(1, Ordering::Relaxed);
    }

    if matches!(event, ServerEvent::Unknown) {
        tracing::debug!("Ignoring unrecognized server event");
        return;
    }

    // Subscribers must never block the socket; overflow drops and counts.
    if let Err(mpsc::error::TrySendError::Full(_)) = in_tx.try_send(InboundEvent::Event(event)) {
        tracing::warn!("Inbound event queue full; dropping event");
        if let Some(m) = metrics {
            m.transport_inbound_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
