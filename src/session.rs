//! Комната: сигналинг, переговоры с участниками и реестр соединений.
//!
//! Жизненный цикл: `Idle → Joining → Joined → Leaving → Closed`. Отдельного
//! состояния ошибки нет: неудачный `join_room` оставляет сессию закрытой,
//! владелец создаёт новую.
//!
//! В реестре оказываются только полностью согласованные соединения: после
//! применения answer (путь `peer_added`) или сразу после создания своего
//! answer (путь `connection_request`).

use crate::config::Settings;
use crate::error::{PeerError, RoomError, RpcError};
use crate::logger::{dump_selected_pair, trace_candidate};
use crate::media::MediaStream;
use crate::peer::ice::{local_candidate, wait_for};
use crate::peer::types::{
    ConnectionRequestParams, ConnectionResponse, IceCandidateParams, JoinResponse, PeerAddedParams,
    PeerInfo,
};
use crate::peer::{PeerLink, PeerRegistry};
use crate::rpc::{MessageSink, RpcChannel};
use crate::signaling::{SignalingConnector, TransportEvent, WebSocketConnector};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Idle,
    Joining,
    Joined,
    Leaving,
    Closed,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomState::Idle => "idle",
            RoomState::Joining => "joining",
            RoomState::Joined => "joined",
            RoomState::Leaving => "leaving",
            RoomState::Closed => "closed",
        }
    }

    fn is_active(&self) -> bool {
        matches!(self, RoomState::Joining | RoomState::Joined)
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Чем закончились переговоры с одним участником
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Соединение согласовано и зарегистрировано
    Connected,
    /// Политика отказалась соединяться
    Declined,
    /// Удалённая сторона не прислала answer
    Rejected,
    /// Комнату покинули во время переговоров
    Aborted,
}

/// Решает, соединяться ли с участником, и создаёт для него [`PeerLink`].
/// `Ok(None)` означает отказ.
#[async_trait]
pub trait PeerPolicy: Send + Sync {
    /// Участник вошёл после нас; мы будем отправлять offer
    async fn on_peer_added(&self, peer: &PeerInfo) -> Result<Option<Arc<PeerLink>>, RoomError>;

    /// Участник прислал offer
    async fn on_connection_request(
        &self,
        peer: &PeerInfo,
    ) -> Result<Option<Arc<PeerLink>>, RoomError>;
}

type StreamFactory = Arc<dyn Fn() -> MediaStream + Send + Sync>;
type StateCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Соединяется со всеми; каждый link получает свой поток из фабрики
pub struct DefaultPeerPolicy {
    stream: StreamFactory,
}

impl DefaultPeerPolicy {
    pub fn new<F>(stream: F) -> Self
    where
        F: Fn() -> MediaStream + Send + Sync + 'static,
    {
        Self {
            stream: Arc::new(stream),
        }
    }
}

#[async_trait]
impl PeerPolicy for DefaultPeerPolicy {
    async fn on_peer_added(&self, peer: &PeerInfo) -> Result<Option<Arc<PeerLink>>, RoomError> {
        Ok(Some(PeerLink::new(
            &peer.peer_id,
            &peer.self_description,
            (self.stream)(),
            true,
        )))
    }

    async fn on_connection_request(
        &self,
        peer: &PeerInfo,
    ) -> Result<Option<Arc<PeerLink>>, RoomError> {
        Ok(Some(PeerLink::new(
            &peer.peer_id,
            &peer.self_description,
            (self.stream)(),
            false,
        )))
    }
}

/// Исходящая сторона транспорта; после закрытия все отправки завершаются ошибкой
struct TransportSink {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl TransportSink {
    fn close(&self) {
        self.tx.lock().take();
    }
}

#[async_trait]
impl MessageSink for TransportSink {
    async fn send_message(&self, raw: String) -> Result<(), String> {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx.send_message(raw).await,
            None => Err("transport closed".to_string()),
        }
    }
}

pub struct RoomSessionBuilder {
    room_id: String,
    self_description: String,
    settings: Settings,
    connector: Arc<dyn SignalingConnector>,
    policy: Option<Arc<dyn PeerPolicy>>,
    default_stream: Option<StreamFactory>,
    on_state_changed: Option<StateCallback>,
}

impl RoomSessionBuilder {
    pub fn self_description(mut self, description: impl Into<String>) -> Self {
        self.self_description = description.into();
        self
    }

    pub fn connector(mut self, connector: Arc<dyn SignalingConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn PeerPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Поток для [`DefaultPeerPolicy`], если своя политика не задана
    pub fn default_stream<F>(mut self, stream: F) -> Self
    where
        F: Fn() -> MediaStream + Send + Sync + 'static,
    {
        self.default_stream = Some(Arc::new(stream));
        self
    }

    pub fn on_peer_connection_state_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.on_state_changed = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<RoomSession, RoomError> {
        let policy: Arc<dyn PeerPolicy> = match (self.policy, self.default_stream) {
            (Some(policy), _) => policy,
            (None, Some(stream)) => Arc::new(DefaultPeerPolicy { stream }),
            (None, None) => {
                return Err(RoomError::Policy(
                    "a default media stream is required when no peer policy is provided".into(),
                ))
            }
        };

        Ok(RoomSession {
            inner: Arc::new(RoomInner {
                room_id: self.room_id,
                self_description: self.self_description,
                settings: self.settings,
                connector: self.connector,
                policy,
                on_state_changed: Mutex::new(self.on_state_changed),
                state: Mutex::new(RoomState::Idle),
                sink: Mutex::new(None),
                rpc: Mutex::new(None),
                reader: Mutex::new(None),
                registry: PeerRegistry::new(),
                negotiating: Mutex::new(Vec::new()),
            }),
        })
    }
}

/// Сессия одной комнаты; клоны указывают на одну и ту же сессию
#[derive(Clone)]
pub struct RoomSession {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    room_id: String,
    self_description: String,
    settings: Settings,
    connector: Arc<dyn SignalingConnector>,
    policy: Arc<dyn PeerPolicy>,
    on_state_changed: Mutex<Option<StateCallback>>,
    state: Mutex<RoomState>,
    sink: Mutex<Option<Arc<TransportSink>>>,
    rpc: Mutex<Option<Arc<RpcChannel>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    registry: PeerRegistry,
    // соединения, переговоры по которым ещё идут
    negotiating: Mutex<Vec<Arc<PeerLink>>>,
}

impl fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", &self.inner.room_id)
            .field("state", &self.state())
            .field("peers", &self.inner.registry.ids())
            .finish()
    }
}

impl RoomSession {
    pub fn builder(room_id: impl Into<String>, settings: Settings) -> RoomSessionBuilder {
        RoomSessionBuilder {
            room_id: room_id.into(),
            self_description: settings.room.self_description.clone(),
            settings,
            connector: Arc::new(WebSocketConnector),
            policy: None,
            default_stream: None,
            on_state_changed: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    pub fn self_description(&self) -> &str {
        &self.inner.self_description
    }

    pub fn state(&self) -> RoomState {
        *self.inner.state.lock()
    }

    /// Идентификаторы зарегистрированных участников
    pub fn peer_ids(&self) -> Vec<String> {
        self.inner.registry.ids()
    }

    pub fn peer(&self, peer_id: &str) -> Option<Arc<PeerLink>> {
        self.inner.registry.get(peer_id)
    }

    pub fn peers(&self) -> Vec<Arc<PeerLink>> {
        self.inner
            .registry
            .ids()
            .iter()
            .filter_map(|id| self.inner.registry.get(id))
            .collect()
    }

    /// Единственный подписчик на смену состояния соединений с участниками
    pub fn set_on_peer_connection_state_changed<F>(&self, f: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        *self.inner.on_state_changed.lock() = Some(Arc::new(f));
    }

    /// Подключается к сигналингу и входит в комнату.
    ///
    /// Возвращает участников, которые уже были в комнате.
    pub async fn join_room(&self) -> Result<JoinResponse, RoomError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if *state != RoomState::Idle {
                return Err(RoomError::InvalidState {
                    expected: RoomState::Idle.as_str(),
                    actual: state.as_str(),
                });
            }
            *state = RoomState::Joining;
        }

        match inner.join().await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!(target: "agent_room::room", room_id = %inner.room_id, error = %e, "Error joining room");
                if inner.begin_leaving() {
                    inner.teardown().await;
                    inner.set_state(RoomState::Closed);
                }
                Err(e)
            }
        }
    }

    /// Закрывает все соединения и транспорт. Повторный вызов ничего не делает.
    pub async fn leave_room(&self) {
        let inner = &self.inner;
        if !inner.begin_leaving() {
            return;
        }
        tracing::info!(target: "agent_room::room", room_id = %inner.room_id, "Leaving room");
        inner.teardown().await;
        inner.set_state(RoomState::Closed);
    }
}

impl RoomInner {
    fn state(&self) -> RoomState {
        *self.state.lock()
    }

    fn set_state(&self, next: RoomState) {
        *self.state.lock() = next;
    }

    /// Переводит в `Leaving`; `false`, если уход уже начат
    fn begin_leaving(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, RoomState::Leaving | RoomState::Closed) {
            return false;
        }
        *state = RoomState::Leaving;
        true
    }

    fn rpc(&self) -> Result<Arc<RpcChannel>, RoomError> {
        let rpc = self.rpc.lock().clone();
        rpc.ok_or_else(|| RoomError::InvalidState {
            expected: RoomState::Joined.as_str(),
            actual: self.state().as_str(),
        })
    }

    async fn join(self: &Arc<Self>) -> Result<JoinResponse, RoomError> {
        let url = self.settings.signaling.socket_url();
        tracing::info!(target: "agent_room::room", room_id = %self.room_id, url = %url, "Connecting to signaling server");

        let transport = self.connector.connect(&url).await?;
        tracing::info!(target: "agent_room::room", room_id = %self.room_id, "Signaling transport connected");

        let sink = Arc::new(TransportSink {
            tx: Mutex::new(Some(transport.outbound)),
        });
        let rpc = RpcChannel::with_timeout(
            "signaling",
            sink.clone(),
            self.settings.rpc.call_timeout(),
        );

        let weak = Arc::downgrade(self);
        bind(&rpc, "peer_added", weak.clone(), |room, p: PeerAddedParams| async move {
            room.peer_added(p).await.map(|_| Value::Null)
        });
        bind(&rpc, "connection_request", weak.clone(), |room, p: ConnectionRequestParams| async move {
            room.connection_request(p).await
        });
        bind(&rpc, "add_ice_candidate", weak.clone(), |room, p: IceCandidateParams| async move {
            room.add_ice_candidate(p).await
        });

        // уход мог начаться, пока открывался транспорт
        {
            let state = self.state.lock();
            if !state.is_active() {
                sink.close();
                return Err(RoomError::InvalidState {
                    expected: RoomState::Joining.as_str(),
                    actual: state.as_str(),
                });
            }
            *self.sink.lock() = Some(sink);
            *self.rpc.lock() = Some(rpc.clone());
        }

        let reader_rpc = rpc.clone();
        let mut inbound = transport.inbound;
        let reader = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    TransportEvent::Message(text) => reader_rpc.handle_message(&text).await,
                    TransportEvent::Closed => break,
                }
            }
            if let Some(room) = weak.upgrade() {
                tokio::spawn(async move { room.on_transport_closed().await });
            }
        });
        *self.reader.lock() = Some(reader);

        let result = rpc
            .request(
                "join",
                json!({
                    "room_id": self.room_id,
                    "self_description": self.self_description,
                }),
            )
            .await?;

        let response = if result.is_null() {
            JoinResponse::default()
        } else {
            serde_json::from_value::<JoinResponse>(result).map_err(|e| {
                RoomError::InvalidParams {
                    method: "join".into(),
                    reason: e.to_string(),
                }
            })?
        };

        {
            let mut state = self.state.lock();
            if *state != RoomState::Joining {
                return Err(RoomError::InvalidState {
                    expected: RoomState::Joining.as_str(),
                    actual: state.as_str(),
                });
            }
            *state = RoomState::Joined;
        }

        tracing::info!(
            target: "agent_room::room",
            room_id = %self.room_id,
            existing_peers = response.existing_peers.len(),
            "Joined room"
        );
        Ok(response)
    }

    async fn on_transport_closed(&self) {
        if !self.begin_leaving() {
            return;
        }
        tracing::warn!(target: "agent_room::room", room_id = %self.room_id, "Signaling transport closed, closing all peers");
        self.teardown().await;
        self.set_state(RoomState::Closed);
    }

    /// Закрывает соединения (в том числе недоговорённые), затем транспорт
    async fn teardown(&self) {
        let mut links = self.registry.drain();
        links.append(&mut *self.negotiating.lock());
        for link in links {
            link.close().await;
            tracing::info!(target: "agent_room::room", peer_id = %link.id(), "Peer connection closed");
        }

        if let Some(rpc) = self.rpc.lock().take() {
            rpc.close();
        }
        if let Some(sink) = self.sink.lock().take() {
            sink.close();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }

    fn track_negotiating(&self, link: &Arc<PeerLink>) {
        self.negotiating.lock().push(link.clone());
    }

    fn untrack_negotiating(&self, link: &Arc<PeerLink>) {
        self.negotiating.lock().retain(|l| !Arc::ptr_eq(l, link));
    }

    /// Регистрирует link, если комната ещё активна. Вытесненный link закрывается.
    async fn register(&self, link: &Arc<PeerLink>) -> bool {
        let displaced = {
            let state = self.state.lock();
            if !state.is_active() || link.is_closed() {
                return false;
            }
            self.registry.insert(link.clone())
        };
        if let Some(old) = displaced {
            if !Arc::ptr_eq(&old, link) {
                tracing::warn!(target: "agent_room::room", peer_id = %old.id(), "Replacing existing peer connection");
                old.close().await;
            }
        }
        tracing::info!(target: "agent_room::room", peer_id = %link.id(), "Peer connection added");
        true
    }

    /// Поднимает соединение и навешивает пересылку ICE и отслеживание состояния
    async fn configure_peer(self: &Arc<Self>, link: &Arc<PeerLink>) -> Result<(), RoomError> {
        link.initialize(&self.settings.ice).await?;
        let pc = link.peer_connection().ok_or(PeerError::NotInitialized)?;
        let peer_id = link.id().to_owned();

        let room = Arc::downgrade(self);
        let ice_peer = peer_id.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let room = room.clone();
            let peer_id = ice_peer.clone();
            Box::pin(async move {
                let Some(cand) = cand else {
                    tracing::debug!(target: "agent_room::ice", peer_id, "ICE candidate gathering completed");
                    return;
                };
                let (Some(room), Some(candidate)) = (room.upgrade(), local_candidate(&peer_id, &cand)) else {
                    return;
                };
                let Ok(rpc) = room.rpc() else {
                    return;
                };
                let params = IceCandidateParams { peer_id, candidate };
                match serde_json::to_value(&params) {
                    Ok(value) => {
                        if let Err(e) = rpc.notify("relay_ice_candidate", value).await {
                            tracing::debug!(target: "agent_room::ice", peer_id = %params.peer_id, error = %e, "Failed to relay ICE candidate");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "agent_room::ice", error = %e, "Failed to encode ICE candidate");
                    }
                }
            })
        }));

        let room = Arc::downgrade(self);
        let weak_link = Arc::downgrade(link);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            tracing::info!(target: "agent_room::room", peer_id = %peer_id, state = %st, "Connection state changed");

            let Some(room) = room.upgrade() else {
                return Box::pin(async {});
            };
            let cb = room.on_state_changed.lock().clone();
            if let Some(cb) = cb {
                cb(&peer_id, st == RTCPeerConnectionState::Connected);
            }

            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed
            ) {
                if let Some(link) = weak_link.upgrade() {
                    tokio::spawn(async move {
                        if st == RTCPeerConnectionState::Disconnected {
                            if let Some(pc) = link.peer_connection() {
                                dump_selected_pair(&pc, link.id(), "BEFORE-CLOSE").await;
                            }
                        }
                        link.close().await;
                        if room.registry.remove_if_same(&link) {
                            tracing::info!(target: "agent_room::room", peer_id = %link.id(), "Peer connection removed");
                        }
                    });
                }
            }
            Box::pin(async {})
        }));

        Ok(())
    }

    async fn peer_added(self: &Arc<Self>, params: PeerAddedParams) -> Result<NegotiationOutcome, RoomError> {
        tracing::info!(target: "agent_room::room", peer_id = %params.peer_id, self_description = %params.self_description, "Peer added");
        let peer = PeerInfo {
            peer_id: params.peer_id,
            self_description: params.self_description,
        };

        let Some(link) = self.policy.on_peer_added(&peer).await? else {
            tracing::info!(target: "agent_room::room", peer_id = %peer.peer_id, "Declined to connect to peer");
            return Ok(NegotiationOutcome::Declined);
        };

        self.track_negotiating(&link);
        let outcome = self.offer_to(&link).await;
        self.untrack_negotiating(&link);

        match outcome {
            Ok(NegotiationOutcome::Connected) => Ok(NegotiationOutcome::Connected),
            Ok(other) => {
                link.close().await;
                Ok(other)
            }
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    async fn offer_to(self: &Arc<Self>, link: &Arc<PeerLink>) -> Result<NegotiationOutcome, RoomError> {
        self.configure_peer(link).await?;
        let offer = link.create_offer().await?;

        tracing::debug!(target: "agent_room::room", peer_id = %link.id(), "Calling request_connection");
        let params = ConnectionRequestParams {
            peer_id: link.id().to_owned(),
            self_description: self.self_description.clone(),
            offer,
        };
        let result = self
            .rpc()?
            .request_with_timeout(
                "request_connection",
                serde_json::to_value(&params).map_err(RpcError::from)?,
                self.settings.rpc.request_connection_timeout(),
            )
            .await?;

        let response = if result.is_object() {
            serde_json::from_value::<ConnectionResponse>(result).map_err(|e| {
                RoomError::InvalidParams {
                    method: "request_connection".into(),
                    reason: e.to_string(),
                }
            })?
        } else {
            ConnectionResponse::default()
        };

        let Some(answer) = response.answer else {
            tracing::info!(target: "agent_room::room", peer_id = %link.id(), "Connection rejected by peer");
            return Ok(NegotiationOutcome::Rejected);
        };

        if !self.state().is_active() || link.is_closed() {
            return Ok(NegotiationOutcome::Aborted);
        }
        link.apply_answer(answer).await?;

        if self.register(link).await {
            Ok(NegotiationOutcome::Connected)
        } else {
            Ok(NegotiationOutcome::Aborted)
        }
    }

    async fn connection_request(self: &Arc<Self>, params: ConnectionRequestParams) -> Result<Value, RoomError> {
        tracing::info!(target: "agent_room::room", peer_id = %params.peer_id, self_description = %params.self_description, "Connection request");
        let peer = PeerInfo {
            peer_id: params.peer_id,
            self_description: params.self_description,
        };

        let Some(link) = self.policy.on_connection_request(&peer).await? else {
            tracing::info!(target: "agent_room::room", peer_id = %peer.peer_id, "Connection request rejected");
            return Ok(Value::Null);
        };

        self.track_negotiating(&link);
        let outcome = self.answer_to(&link, params.offer).await;
        self.untrack_negotiating(&link);

        match outcome {
            Ok(Some(answer)) => Ok(answer),
            Ok(None) => {
                link.close().await;
                Ok(Value::Null)
            }
            Err(e) => {
                link.close().await;
                Err(e)
            }
        }
    }

    async fn answer_to(
        self: &Arc<Self>,
        link: &Arc<PeerLink>,
        offer: RTCSessionDescription,
    ) -> Result<Option<Value>, RoomError> {
        self.configure_peer(link).await?;
        let answer = link.accept_offer(offer).await?;
        let answer = serde_json::to_value(&answer).map_err(RpcError::from)?;

        // регистрация до того, как answer дошёл до удалённой стороны
        if !self.register(link).await {
            return Ok(None);
        }
        tracing::debug!(target: "agent_room::room", peer_id = %link.id(), "Sending answer");
        Ok(Some(answer))
    }

    async fn add_ice_candidate(self: &Arc<Self>, params: IceCandidateParams) -> Result<Value, RoomError> {
        let IceCandidateParams { peer_id, candidate } = params;
        trace_candidate("REMOTE", &peer_id, &candidate);

        // кандидат может прийти раньше, чем участник попадёт в реестр
        let link = wait_for(
            self.settings.room.ice_wait_interval(),
            self.settings.room.ice_wait_timeout(),
            || {
                let found = self.registry.get(&peer_id);
                async move { found }
            },
        )
        .await;

        let Some(link) = link else {
            tracing::info!(target: "agent_room::ice", peer_id = %peer_id, "ICE peer not found, dropping candidate");
            return Ok(json!({ "applied": false }));
        };

        link.add_ice_candidate(candidate).await?;
        tracing::debug!(target: "agent_room::ice", peer_id = %peer_id, "ICE candidate added");
        Ok(json!({ "applied": true }))
    }
}

/// Регистрирует обработчик с разбором параметров; комната держится по слабой ссылке
fn bind<P, F, Fut>(rpc: &RpcChannel, method: &'static str, room: Weak<RoomInner>, f: F)
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(Arc<RoomInner>, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RoomError>> + Send + 'static,
{
    let f = Arc::new(f);
    rpc.on(method, move |params: Value| {
        let room = room.clone();
        let f = f.clone();
        async move {
            let room = room.upgrade().ok_or(RoomError::InvalidState {
                expected: RoomState::Joined.as_str(),
                actual: RoomState::Closed.as_str(),
            })?;
            let params: P =
                serde_json::from_value(params).map_err(|e| RoomError::InvalidParams {
                    method: method.to_string(),
                    reason: e.to_string(),
                })?;
            f(room, params).await
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::ChannelConnector;

    #[test]
    fn test_build_requires_policy_or_stream() {
        let result = RoomSession::builder("room1", Settings::default()).build();
        assert!(matches!(result, Err(RoomError::Policy(_))));

        let session = RoomSession::builder("room1", Settings::default())
            .default_stream(MediaStream::empty)
            .build()
            .unwrap();
        assert_eq!(session.state(), RoomState::Idle);
        assert_eq!(session.self_description(), "User");
    }

    #[tokio::test]
    async fn test_refused_transport_fails_join() {
        let connector = Arc::new(ChannelConnector::refusing());
        let session = RoomSession::builder("room1", Settings::default())
            .connector(connector.clone())
            .default_stream(MediaStream::empty)
            .build()
            .unwrap();

        assert!(matches!(session.join_room().await, Err(RoomError::Transport(_))));
        assert_eq!(session.state(), RoomState::Closed);
        assert_eq!(connector.urls(), vec!["ws://localhost:8080/ws"]);

        // повторный вход в ту же сессию запрещён
        assert!(matches!(
            session.join_room().await,
            Err(RoomError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_leave_idle_session() {
        let session = RoomSession::builder("room1", Settings::default())
            .default_stream(MediaStream::empty)
            .build()
            .unwrap();
        session.leave_room().await;
        session.leave_room().await;
        assert_eq!(session.state(), RoomState::Closed);
    }
}
