//! Транспорт до сервера сигналинга.
//!
//! Комната работает с парой каналов: исходящие текстовые кадры и входящие
//! события. Настоящее соединение держит [`WebSocketConnector`], в тестах его
//! заменяет [`ChannelConnector`].

use crate::error::RoomError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Входящее событие транспорта
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed,
}

/// Открытый транспорт: отправка кадров и поток входящих событий
pub struct SignalingTransport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SignalingTransport, RoomError>;
}

/// WebSocket до сервера сигналинга
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<SignalingTransport, RoomError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RoomError::Transport(format!("websocket connect failed: {e}")))?;
        tracing::debug!(target: "agent_room::signaling", url, "Signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                tracing::trace!(target: "agent_room::signaling", len = text.len(), "ws out");
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(target: "agent_room::signaling", len = text.len(), "ws in");
                        if in_tx.send(TransportEvent::Message(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if in_tx.send(TransportEvent::Message(text)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(target: "agent_room::signaling", error = %e, "Non-UTF-8 frame dropped");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(target: "agent_room::signaling", error = %e, "Signaling websocket error");
                        break;
                    }
                }
            }
            tracing::info!(target: "agent_room::signaling", "Signaling websocket closed");
            let _ = in_tx.send(TransportEvent::Closed);
        });

        Ok(SignalingTransport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Серверная сторона транспорта в памяти
pub struct RemoteEnd {
    /// Кадры, отправленные клиентом
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// Отправка кадров и закрытия клиенту
    pub outgoing: mpsc::UnboundedSender<TransportEvent>,
}

impl RemoteEnd {
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outgoing.send(TransportEvent::Message(text.into())).is_ok()
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(TransportEvent::Closed);
    }
}

/// Транспорт в памяти: каждое подключение отдаёт свою [`RemoteEnd`] в канал
pub struct ChannelConnector {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    refuse: bool,
    urls: Mutex<Vec<String>>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                remotes: tx,
                refuse: false,
                urls: Mutex::new(Vec::new()),
            },
            rx,
        )
    }

    /// Коннектор, который отказывает в каждом подключении
    pub fn refusing() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self {
            remotes: tx,
            refuse: true,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Адреса, по которым пытались подключиться
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl SignalingConnector for ChannelConnector {
    async fn connect(&self, url: &str) -> Result<SignalingTransport, RoomError> {
        self.urls.lock().push(url.to_owned());
        if self.refuse {
            return Err(RoomError::Transport(format!("connection to {url} refused")));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.remotes
            .send(RemoteEnd {
                incoming: out_rx,
                outgoing: in_tx,
            })
            .map_err(|_| RoomError::Transport("no listener for in-memory transport".into()))?;

        Ok(SignalingTransport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
