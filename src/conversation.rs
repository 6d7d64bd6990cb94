//! Голосовой разговор с агентом поверх [`RoomSession`].
//!
//! Контроллер решает, кто в комнате агент, приглашает его при необходимости
//! и превращает уведомления агента в наблюдаемое [`ConversationState`].

use crate::config::Settings;
use crate::error::{ConversationError, MediaError, PeerError, RoomError};
use crate::invite::AgentInviter;
use crate::media::{AudioDevice, MediaSource, MediaStream};
use crate::peer::types::{JoinResponse, PeerInfo};
use crate::peer::PeerLink;
use crate::rpc::RpcChannel;
use crate::session::{PeerPolicy, RoomSession};
use crate::signaling::SignalingConnector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Предложение агента
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiSentence {
    pub sentence: String,
    pub sentence_id: String,
    pub received_at: DateTime<Utc>,
}

/// Наблюдаемое состояние разговора
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationState {
    pub audio_devices: Vec<AudioDevice>,
    pub selected_audio_device: Option<AudioDevice>,
    pub audio_muted: bool,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub is_calibrating: bool,
    pub is_user_speaking: bool,
    pub current_detected_speech: Option<String>,
    pub ai_messages: Vec<AiSentence>,
    pub currently_speaking_sentence_id: Option<String>,
    pub show_ai_messages: bool,
    pub initialization_error: Option<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            audio_devices: Vec::new(),
            selected_audio_device: None,
            audio_muted: false,
            is_connecting: true,
            is_connected: false,
            is_calibrating: false,
            is_user_speaking: false,
            current_detected_speech: None,
            ai_messages: Vec::new(),
            currently_speaking_sentence_id: None,
            show_ai_messages: true,
            initialization_error: None,
        }
    }
}

// Параметры уведомлений агента

#[derive(Deserialize)]
struct StatusParams {
    status: String,
}

#[derive(Deserialize)]
struct SpeakingParams {
    is_speaking: bool,
}

#[derive(Deserialize)]
struct SpeechParams {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct SentenceParams {
    sentence: String,
    #[serde(deserialize_with = "id_string")]
    sentence_id: String,
}

#[derive(Deserialize)]
struct SentenceIdParams {
    #[serde(default, deserialize_with = "opt_id_string")]
    sentence_id: Option<String>,
}

/// Идентификатор может прийти строкой или числом
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Ok(Some(other.to_string())),
    }
}

type VolumeCallback = Arc<dyn Fn(&str, f32) + Send + Sync>;

/// Контроллер разговора; клоны разделяют состояние
#[derive(Clone)]
pub struct AgentConversationController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    settings: Settings,
    media: Arc<dyn MediaSource>,
    inviter: Arc<dyn AgentInviter>,
    connector: Arc<dyn SignalingConnector>,
    state: watch::Sender<ConversationState>,
    session: Mutex<Option<RoomSession>>,
    local_stream: Mutex<Option<MediaStream>>,
    agent_rpc: Mutex<Option<Arc<RpcChannel>>>,
    on_inbound_volume: Mutex<Option<VolumeCallback>>,
}

impl AgentConversationController {
    pub fn new(
        settings: Settings,
        media: Arc<dyn MediaSource>,
        inviter: Arc<dyn AgentInviter>,
        connector: Arc<dyn SignalingConnector>,
    ) -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        Self {
            inner: Arc::new(ControllerInner {
                settings,
                media,
                inviter,
                connector,
                state,
                session: Mutex::new(None),
                local_stream: Mutex::new(None),
                agent_rpc: Mutex::new(None),
                on_inbound_volume: Mutex::new(None),
            }),
        }
    }

    /// Снимок текущего состояния
    pub fn state(&self) -> ConversationState {
        self.inner.state.borrow().clone()
    }

    /// Подписка на изменения состояния
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.inner.state.subscribe()
    }

    pub fn session(&self) -> Option<RoomSession> {
        self.inner.session.lock().clone()
    }

    /// RPC-канал последнего подключённого участника
    pub fn agent_rpc(&self) -> Option<Arc<RpcChannel>> {
        self.inner.agent_rpc.lock().clone()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.inner.local_stream.lock().clone()
    }

    /// Политика, по которой контроллер создаёт соединения с участниками
    pub fn peer_policy(&self) -> Arc<dyn PeerPolicy> {
        Arc::new(AgentPolicy {
            controller: Arc::downgrade(&self.inner),
        })
    }

    /// Единственный подписчик на уровень громкости входящего звука участника
    pub fn set_on_inbound_volume_change<F>(&self, f: F)
    where
        F: Fn(&str, f32) + Send + Sync + 'static,
    {
        *self.inner.on_inbound_volume.lock() = Some(Arc::new(f));
    }

    /// Устройства, поток, вход в комнату `context_id` и приглашение агента.
    ///
    /// Ошибка сохраняется в `initialization_error`, сессия разбирается;
    /// повторять должен вызывающий.
    pub async fn initialize(&self, context_id: &str) -> Result<JoinResponse, ConversationError> {
        tracing::info!(target: "agent_room::conversation", context_id, "Starting initialization");
        self.inner.update(|s| {
            s.is_connecting = true;
            s.initialization_error = None;
        });

        match self.try_initialize(context_id).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!(target: "agent_room::conversation", context_id, error = %e, "Initialization error");
                self.inner.update(|s| {
                    s.initialization_error = Some(e.to_string());
                    s.is_connecting = false;
                });
                self.inner.teardown().await;
                Err(e)
            }
        }
    }

    async fn try_initialize(&self, context_id: &str) -> Result<JoinResponse, ConversationError> {
        let inner = &self.inner;

        let devices = inner.media.initialize().await?;
        let selected = devices.first().cloned();
        inner.update(|s| {
            s.audio_devices = devices.clone();
            s.selected_audio_device = selected.clone();
        });

        let stream = inner
            .media
            .open_stream(selected.as_ref().map(|d| d.device_id.as_str()))
            .await?;
        if let Some(old) = inner.local_stream.lock().replace(stream) {
            old.stop();
        }

        let weak = Arc::downgrade(inner);
        let session = RoomSession::builder(context_id, inner.settings.clone())
            .self_description(inner.settings.room.self_description.clone())
            .connector(inner.connector.clone())
            .policy(self.peer_policy())
            .on_peer_connection_state_changed(move |peer_id, connected| {
                tracing::info!(target: "agent_room::conversation", peer_id, connected, "Peer connection status");
                if let Some(inner) = weak.upgrade() {
                    inner.update(|s| {
                        s.is_connected = connected;
                        s.is_connecting = !connected;
                    });
                }
            })
            .build()?;

        let previous = inner.session.lock().replace(session.clone());
        if let Some(previous) = previous {
            previous.leave_room().await;
        }

        let response = session.join_room().await?;
        tracing::info!(
            target: "agent_room::conversation",
            existing_peers = response.existing_peers.len(),
            "Joined room"
        );

        if response.has_peer_described_as(&inner.settings.room.agent_description) {
            tracing::info!(target: "agent_room::conversation", "Agent already in room");
        } else {
            tracing::info!(target: "agent_room::conversation", "No agent found, inviting agent");
            inner.inviter.invite(context_id).await?;
        }
        Ok(response)
    }

    /// Переключает микрофон. Возвращает `Some(muted)` или `None`, если потока нет.
    pub fn toggle_microphone(&self) -> Option<bool> {
        let Some(stream) = self.local_stream() else {
            tracing::warn!(target: "agent_room::conversation", "No media stream available");
            return None;
        };
        let track = stream.audio_tracks().into_iter().next()?;

        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        self.inner.update(|s| s.audio_muted = !enabled);

        if let Some(session) = self.session() {
            for link in session.peers() {
                link.set_outbound_audio_enabled(enabled);
            }
        }
        tracing::info!(target: "agent_room::conversation", "Microphone {}", if enabled { "unmuted" } else { "muted" });
        Some(!enabled)
    }

    /// Переключает устройство ввода: новый локальный поток и подмена трека у всех участников
    pub async fn select_audio_device(&self, device_id: &str) -> Result<(), ConversationError> {
        let device = self
            .state()
            .audio_devices
            .into_iter()
            .find(|d| d.device_id == device_id);
        let Some(device) = device else {
            tracing::warn!(target: "agent_room::conversation", device_id, "Audio device not found");
            return Err(MediaError::DeviceNotFound(device_id.to_owned()).into());
        };
        self.inner
            .update(|s| s.selected_audio_device = Some(device.clone()));

        let muted = self.state().audio_muted;
        if self.local_stream().is_some() {
            let stream = self.inner.media.open_stream(Some(device_id)).await?;
            stream
                .audio_tracks()
                .iter()
                .for_each(|t| t.set_enabled(!muted));
            if let Some(old) = self.inner.local_stream.lock().replace(stream) {
                old.stop();
            }
        }

        if let Some(session) = self.session() {
            for link in session.peers() {
                let fresh = self.inner.media.open_stream(Some(device_id)).await?;
                let old_tracks = link.outbound_stream().audio_tracks();
                for track in fresh.audio_tracks() {
                    track.set_enabled(!muted);
                    link.replace_audio_track(track)
                        .await
                        .map_err(RoomError::from)?;
                }
                old_tracks.iter().for_each(|t| t.stop());
            }
        }

        tracing::info!(target: "agent_room::conversation", device_id, "Audio device selected");
        Ok(())
    }

    /// Выходит из комнаты, освобождает устройства и сбрасывает состояние
    pub async fn leave_room(&self) {
        tracing::info!(target: "agent_room::conversation", "Leaving room");
        if let Some(stream) = self.local_stream() {
            stream.stop();
        }
        self.inner.media.cleanup();
        self.reset().await;
    }

    /// Сбрасывает контроллер в начальное состояние
    pub async fn reset(&self) {
        tracing::debug!(target: "agent_room::conversation", "Resetting");
        self.inner.teardown().await;
        self.inner.state.send_replace(ConversationState::default());
    }
}

impl ControllerInner {
    fn update(&self, f: impl FnOnce(&mut ConversationState)) {
        self.state.send_modify(f);
    }

    async fn teardown(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.leave_room().await;
        }
        if let Some(stream) = self.local_stream.lock().take() {
            stream.stop();
        }
        self.agent_rpc.lock().take();
    }

    /// Создаёт link со своим потоком и RPC-каналом поверх его data-channel
    async fn create_peer(
        self: &Arc<Self>,
        peer: &PeerInfo,
        create_data_channel: bool,
    ) -> Result<Option<Arc<PeerLink>>, RoomError> {
        tracing::info!(target: "agent_room::conversation", peer_id = %peer.peer_id, "Setting up peer connection");

        let (device_id, muted) = {
            let state = self.state.borrow();
            (
                state
                    .selected_audio_device
                    .as_ref()
                    .map(|d| d.device_id.clone()),
                state.audio_muted,
            )
        };
        let stream = self
            .media
            .open_stream(device_id.as_deref())
            .await
            .map_err(PeerError::from)?;
        stream
            .audio_tracks()
            .iter()
            .for_each(|t| t.set_enabled(!muted));

        let link = PeerLink::new(
            &peer.peer_id,
            &peer.self_description,
            stream,
            create_data_channel,
        );

        let weak = Arc::downgrade(self);
        let peer_id = peer.peer_id.clone();
        link.set_on_volume_change(move |level| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let cb = inner.on_inbound_volume.lock().clone();
            if let Some(cb) = cb {
                cb(&peer_id, level);
            }
        });

        let rpc = RpcChannel::with_timeout(
            format!("peer:{}", peer.peer_id),
            link.rpc_sink(),
            self.settings.rpc.call_timeout(),
        );
        self.bind_agent_events(&rpc);

        let handler_rpc = rpc.clone();
        link.set_on_message(move |text| {
            let rpc = handler_rpc.clone();
            async move { rpc.handle_message(&text).await }
        });

        *self.agent_rpc.lock() = Some(rpc);
        tracing::info!(target: "agent_room::conversation", peer_id = %peer.peer_id, "Peer connection setup complete");
        Ok(Some(link))
    }

    fn bind_agent_events(self: &Arc<Self>, rpc: &RpcChannel) {
        self.on_event(rpc, "data_channel_connection_status", |s, p: StatusParams| {
            tracing::info!(target: "agent_room::conversation", status = %p.status, "Data channel status");
            s.is_connected = p.status == "connected";
        });
        self.on_event(rpc, "calibration_status", |s, p: StatusParams| {
            tracing::info!(target: "agent_room::conversation", status = %p.status, "Calibration status");
            s.is_calibrating = p.status == "started";
        });
        self.on_event(rpc, "is_speaking_status", |s, p: SpeakingParams| {
            tracing::debug!(target: "agent_room::conversation", is_speaking = p.is_speaking, "User speaking");
            s.is_user_speaking = p.is_speaking;
        });
        self.on_event(rpc, "speech_detected", |s, p: SpeechParams| {
            tracing::debug!(target: "agent_room::conversation", text = ?p.text, "Speech detected");
            s.current_detected_speech = p.text;
        });
        self.on_event(rpc, "ai_sentence", |s, p: SentenceParams| {
            tracing::debug!(target: "agent_room::conversation", sentence_id = %p.sentence_id, "AI sentence");
            s.ai_messages.push(AiSentence {
                sentence: p.sentence,
                sentence_id: p.sentence_id,
                received_at: Utc::now(),
            });
            s.show_ai_messages = true;
        });
        self.on_event(rpc, "is_speaking_sentence", |s, p: SentenceIdParams| {
            tracing::debug!(target: "agent_room::conversation", sentence_id = ?p.sentence_id, "AI speaking sentence");
            s.currently_speaking_sentence_id = p.sentence_id;
        });

        let weak = Arc::downgrade(self);
        rpc.on_sync("stoped_speaking", move |_params: Value| {
            let Some(inner) = weak.upgrade() else {
                return Ok::<_, String>(Value::Null);
            };
            tracing::info!(target: "agent_room::conversation", "AI stopped speaking");
            inner.update(|s| {
                s.currently_speaking_sentence_id = None;
                s.current_detected_speech = None;
                s.show_ai_messages = false;
            });

            // список предложений очищается с задержкой; таймер не отменяется
            let delay = inner.settings.conversation.message_clear_delay();
            let weak = Arc::downgrade(&inner);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(inner) = weak.upgrade() {
                    inner.update(|s| s.ai_messages.clear());
                }
            });
            Ok(Value::Null)
        });
    }

    fn on_event<P, F>(self: &Arc<Self>, rpc: &RpcChannel, method: &'static str, apply: F)
    where
        P: DeserializeOwned,
        F: Fn(&mut ConversationState, P) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        rpc.on_sync(method, move |params: Value| {
            let params: P = serde_json::from_value(params)
                .map_err(|e| format!("invalid {method} params: {e}"))?;
            if let Some(inner) = weak.upgrade() {
                inner.update(|s| apply(s, params));
            }
            Ok::<_, String>(Value::Null)
        });
    }
}

/// Агенту отправляем offer с data-channel, остальным без; на чужие offer отвечаем всегда
struct AgentPolicy {
    controller: Weak<ControllerInner>,
}

impl AgentPolicy {
    fn controller(&self) -> Result<Arc<ControllerInner>, RoomError> {
        self.controller
            .upgrade()
            .ok_or_else(|| RoomError::Policy("conversation controller dropped".into()))
    }
}

#[async_trait]
impl PeerPolicy for AgentPolicy {
    async fn on_peer_added(&self, peer: &PeerInfo) -> Result<Option<Arc<PeerLink>>, RoomError> {
        let controller = self.controller()?;
        tracing::info!(target: "agent_room::conversation", peer_id = %peer.peer_id, self_description = %peer.self_description, "Peer added");
        let is_agent = peer.self_description == controller.settings.room.agent_description;
        controller.create_peer(peer, is_agent).await
    }

    async fn on_connection_request(
        &self,
        peer: &PeerInfo,
    ) -> Result<Option<Arc<PeerLink>>, RoomError> {
        let controller = self.controller()?;
        tracing::info!(target: "agent_room::conversation", peer_id = %peer.peer_id, self_description = %peer.self_description, "Connection request");
        controller.create_peer(peer, false).await
    }
}
