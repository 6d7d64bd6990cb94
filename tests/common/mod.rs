#![allow(dead_code)]

use agent_room::config::{IceConfig, Settings};
use agent_room::media::MediaStream;
use agent_room::signaling::{ChannelConnector, RemoteEnd};
use agent_room::{PeerLink, RoomSession};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(10);

/// Сервер сигналинга в памяти
pub struct FakeServer {
    pub remote: RemoteEnd,
    pub relayed: Vec<Value>,
}

impl FakeServer {
    pub async fn accept(remotes: &mut mpsc::UnboundedReceiver<RemoteEnd>) -> Self {
        let remote = timeout(WAIT, remotes.recv())
            .await
            .expect("client never connected")
            .expect("connector dropped");
        Self {
            remote,
            relayed: Vec::new(),
        }
    }

    /// Следующий кадр от клиента, не считая `relay_ice_candidate`
    pub async fn next_frame(&mut self) -> Option<Value> {
        loop {
            let raw = timeout(WAIT, self.remote.incoming.recv())
                .await
                .expect("no frame from client")?;
            let frame: Value = serde_json::from_str(&raw).expect("client sent invalid JSON");
            if frame["method"] == "relay_ice_candidate" {
                self.relayed.push(frame);
                continue;
            }
            return Some(frame);
        }
    }

    pub async fn expect_call(&mut self, method: &str) -> Value {
        let frame = self.next_frame().await.expect("transport closed");
        assert_eq!(frame["method"], method, "unexpected frame {frame}");
        frame
    }

    /// Ждёт ответ клиента на вызов `id`
    pub async fn expect_response(&mut self, id: &str) -> Value {
        let frame = self.next_frame().await.expect("transport closed");
        assert_eq!(frame["id"], id, "unexpected frame {frame}");
        assert!(frame.get("method").is_none());
        frame["result"].clone()
    }

    pub fn respond(&self, id: &Value, result: Value) {
        assert!(self.remote.send(json!({"id": id, "result": result}).to_string()));
    }

    pub fn notify(&self, method: &str, params: Value) {
        assert!(self
            .remote
            .send(json!({"method": method, "params": params, "id": null}).to_string()));
    }

    pub fn call(&self, id: &str, method: &str, params: Value) {
        assert!(self
            .remote
            .send(json!({"method": method, "params": params, "id": id}).to_string()));
    }

    /// Отвечает на `join` и возвращает его параметры
    pub async fn accept_join(&mut self, existing_peers: Value) -> Value {
        let frame = self.expect_call("join").await;
        self.respond(&frame["id"], json!({ "existing_peers": existing_peers }));
        frame["params"].clone()
    }

    /// Собирает кадры, пока клиент не закроет транспорт
    pub async fn drain_until_closed(&mut self) {
        while self.next_frame().await.is_some() {}
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.ice = IceConfig { servers: vec![] };
    settings.room.ice_wait_interval_ms = 20;
    settings.room.ice_wait_timeout_ms = 2000;
    settings.rpc.call_timeout_ms = 2000;
    settings.rpc.request_connection_timeout_ms = 3000;
    settings
}

pub fn session_with(
    settings: Settings,
) -> (RoomSession, mpsc::UnboundedReceiver<RemoteEnd>) {
    let (connector, remotes) = ChannelConnector::new();
    let session = RoomSession::builder("room1", settings)
        .connector(Arc::new(connector))
        .default_stream(|| MediaStream::opus_audio(None))
        .build()
        .unwrap();
    (session, remotes)
}

/// Сессия, уже вошедшая в пустую комнату
pub async fn joined_session(settings: Settings) -> (RoomSession, FakeServer) {
    let (session, mut remotes) = session_with(settings);
    let joining = tokio::spawn({
        let session = session.clone();
        async move { session.join_room().await }
    });
    let mut server = FakeServer::accept(&mut remotes).await;
    server.accept_join(json!([])).await;
    joining.await.unwrap().unwrap();
    (session, server)
}

/// Удалённый участник с настоящим peer connection
pub async fn remote_peer(id: &str, description: &str, create_data_channel: bool) -> Arc<PeerLink> {
    let link = PeerLink::new(id, description, MediaStream::opus_audio(None), create_data_channel);
    link.initialize(&IceConfig { servers: vec![] }).await.unwrap();
    link
}

pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

pub fn host_candidate() -> Value {
    json!({
        "candidate": "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0
    })
}
