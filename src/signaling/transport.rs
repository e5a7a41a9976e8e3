use crate::commands::CallHandle;
use crate::error::CallError;
use crate::peer::engine::MediaTrack;
use crate::signaling::message::{Frame, HEARTBEAT};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Исходящая сторона сигнального канала
pub trait SignalingSink: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), CallError>;
}

/// WebSocket клиент сигнального сервера.
///
/// Входящие сообщения и смена состояния канала уходят командами в `CallHandle`.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: CancellationToken,
}

impl SignalingClient {
    pub async fn connect<T: MediaTrack>(
        uri: &str,
        handle: CallHandle<T>,
    ) -> Result<(Self, JoinHandle<()>), CallError> {
        handle.transport_state(ConnectionState::Connecting)?;

        let ws = match connect_async(uri).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                error!(uri, error = %e, "could not open signaling channel");
                handle.transport_state(ConnectionState::Disconnected)?;
                return Err(e.into());
            }
        };
        info!(uri, "signaling channel opened");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        handle.transport_state(ConnectionState::Connected)?;

        let task = tokio::spawn(pump(
            ws,
            outbound_rx,
            shutdown.clone(),
            handle,
            uri.to_owned(),
        ));
        Ok((Self { outbound, shutdown }, task))
    }

    /// Закрывает канал; сессии звонков при этом не трогаются
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, frame: Frame) -> Result<(), CallError> {
        self.outbound
            .send(frame)
            .map_err(|_| CallError::Transport("signaling channel is closed".into()))
    }
}

async fn pump<T: MediaTrack>(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
    handle: CallHandle<T>,
    uri: String,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = handle.transport_state(ConnectionState::Disconnecting);
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(error = %e, "close frame not delivered");
                }
                break;
            }
            Some(frame) = outbound_rx.recv() => {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode signaling message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "failed to send signaling message");
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                    Ok(Frame::Heartbeat) => {
                        if write.send(Message::Text(HEARTBEAT.to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Frame::Message(message)) => {
                        debug!(kind = message.kind(), "signaling message received");
                        if handle.signaling(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to parse signaling message"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "signaling channel error");
                    break;
                }
            }
        }
    }

    info!(uri = %uri, "signaling channel closed");
    let _ = handle.transport_state(ConnectionState::Disconnected);
}
