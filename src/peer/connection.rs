//! Одно WebRTC соединение с удалённым участником комнаты.
//!
//! [`PeerLink`] владеет `RTCPeerConnection`, исходящим потоком и (не более
//! чем одним) data-channel'ом `"chat"`. Обработчики ICE и состояния
//! соединения навешивает комната, link о сигналинге ничего не знает.

use crate::config::IceConfig;
use crate::error::PeerError;
use crate::media::{MediaStream, MediaTrack};
use crate::peer::data_channel::attach_dc;
use crate::peer::ice::{new_api, rtc_config};
use crate::peer::types::IceCandidate;
use crate::rpc::MessageSink;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

pub const DATA_CHANNEL_LABEL: &str = "chat";

type MessageCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;
type VolumeCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Входящий поток удалённой стороны
#[derive(Clone)]
pub struct InboundStream {
    pub stream_id: String,
    pub track: Arc<TrackRemote>,
}

pub struct PeerLink {
    id: String,
    self_description: String,
    create_data_channel: bool,
    outbound: MediaStream,
    pc: OnceCell<Arc<RTCPeerConnection>>,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    inbound: Mutex<Option<InboundStream>>,
    on_message: Mutex<Option<MessageCallback>>,
    on_volume: Mutex<Option<VolumeCallback>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("self_description", &self.self_description)
            .field("create_data_channel", &self.create_data_channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PeerLink {
    pub fn new(
        id: impl Into<String>,
        self_description: impl Into<String>,
        outbound: MediaStream,
        create_data_channel: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            self_description: self_description.into(),
            create_data_channel,
            outbound,
            pc: OnceCell::new(),
            senders: Mutex::new(Vec::new()),
            data_channel: Mutex::new(None),
            inbound: Mutex::new(None),
            on_message: Mutex::new(None),
            on_volume: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn self_description(&self) -> &str {
        &self.self_description
    }

    pub fn creates_data_channel(&self) -> bool {
        self.create_data_channel
    }

    pub fn outbound_stream(&self) -> &MediaStream {
        &self.outbound
    }

    pub fn peer_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.pc.get().cloned()
    }

    pub fn inbound_stream(&self) -> Option<InboundStream> {
        self.inbound.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> Option<RTCPeerConnectionState> {
        self.pc.get().map(|pc| pc.connection_state())
    }

    /// Открыт ли data-channel
    pub fn is_channel_open(&self) -> bool {
        self.data_channel
            .lock()
            .as_ref()
            .map(|dc| dc.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false)
    }

    /// Создаёт peer connection, data-channel (или ждёт его от удалённой стороны)
    /// и добавляет исходящие треки.
    pub async fn initialize(self: &Arc<Self>, ice: &IceConfig) -> Result<(), PeerError> {
        if self.pc.get().is_some() {
            return Err(PeerError::AlreadyInitialized);
        }
        if self.is_closed() {
            return Err(PeerError::Closed);
        }

        let api = new_api()?;
        let pc = Arc::new(api.new_peer_connection(rtc_config(ice)).await?);

        if let Err(e) = self.setup(&pc).await {
            let _ = pc.close().await;
            return Err(e);
        }

        if self.pc.set(pc.clone()).is_err() {
            let _ = pc.close().await;
            return Err(PeerError::AlreadyInitialized);
        }

        tracing::debug!(
            target: "agent_room::peer",
            peer_id = %self.id,
            initiator = self.create_data_channel,
            tracks = self.outbound.tracks().len(),
            "Peer connection initialized"
        );
        Ok(())
    }

    async fn setup(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>) -> Result<(), PeerError> {
        if self.create_data_channel {
            let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
            attach_dc(self, &dc);
        } else {
            let weak = Arc::downgrade(self);
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                if let Some(link) = weak.upgrade() {
                    attach_dc(&link, &dc);
                }
                Box::pin(async {})
            }));
        }

        let weak = Arc::downgrade(self);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            if let Some(link) = weak.upgrade() {
                let stream_id = track.stream_id();
                tracing::info!(
                    target: "agent_room::peer",
                    peer_id = %link.id,
                    stream_id = %stream_id,
                    kind = ?track.kind(),
                    "Remote track received"
                );
                *link.inbound.lock() = Some(InboundStream { stream_id, track });
            }
            Box::pin(async {})
        }));

        for track in self.outbound.tracks() {
            let sender = pc.add_track(track.local_track()).await?;
            self.senders.lock().push(sender);
        }
        Ok(())
    }

    fn pc(&self) -> Result<&Arc<RTCPeerConnection>, PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        self.pc.get().ok_or(PeerError::NotInitialized)
    }

    /// Создаёт offer и ставит его локальным описанием
    pub async fn create_offer(&self) -> Result<RTCSessionDescription, PeerError> {
        let pc = self.pc()?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Принимает удалённый offer и возвращает answer
    pub async fn accept_offer(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, PeerError> {
        let pc = self.pc()?;
        pc.set_remote_description(offer).await?;
        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    pub async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), PeerError> {
        self.pc()?.set_remote_description(answer).await?;
        Ok(())
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc()?.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    /// Отправляет текст в data-channel. Если канал не открыт, сообщение
    /// теряется с предупреждением в логе.
    pub async fn send_message(&self, text: &str) {
        let dc = self.data_channel.lock().clone();
        match dc {
            Some(dc) if dc.ready_state() == RTCDataChannelState::Open => {
                if let Err(e) = dc.send_text(text.to_owned()).await {
                    tracing::warn!(target: "agent_room::peer", peer_id = %self.id, error = %e, "Failed to send message");
                }
            }
            _ => {
                tracing::warn!(target: "agent_room::peer", peer_id = %self.id, "DataChannel is not open, message dropped");
            }
        }
    }

    /// Приёмник для RPC-канала поверх data-channel этого link
    pub fn rpc_sink(self: &Arc<Self>) -> Arc<dyn MessageSink> {
        Arc::new(LinkSink(Arc::downgrade(self)))
    }

    /// Единственный подписчик на входящие сообщения data-channel
    pub fn set_on_message<F, Fut>(&self, f: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.on_message.lock() = Some(Arc::new(move |text| f(text).boxed()));
    }

    /// Единственный подписчик на уровень громкости входящего звука
    pub fn set_on_volume_change<F>(&self, f: F)
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        *self.on_volume.lock() = Some(Arc::new(f));
    }

    /// Передаёт уровень громкости входящего звука подписчику
    pub fn report_inbound_volume(&self, level: f32) {
        let cb = self.on_volume.lock().clone();
        if let Some(cb) = cb {
            cb(level);
        }
    }

    pub(crate) fn set_data_channel(&self, dc: Arc<RTCDataChannel>) {
        let previous = self.data_channel.lock().replace(dc);
        if previous.is_some() {
            tracing::warn!(target: "agent_room::peer", peer_id = %self.id, "DataChannel replaced");
        }
    }

    pub(crate) async fn deliver_message(&self, text: String) {
        let cb = self.on_message.lock().clone();
        match cb {
            Some(cb) => cb(text).await,
            None => {
                tracing::debug!(target: "agent_room::peer", peer_id = %self.id, "No message handler, dropping message");
            }
        }
    }

    /// Включает или выключает исходящий звук
    pub fn set_outbound_audio_enabled(&self, enabled: bool) {
        for track in self.outbound.audio_tracks() {
            track.set_enabled(enabled);
        }
    }

    /// Подменяет исходящий аудиотрек без пересогласования
    pub async fn replace_audio_track(&self, track: MediaTrack) -> Result<(), PeerError> {
        let pc = self.pc()?;
        let senders = self.senders.lock().clone();

        let mut replaced = false;
        for sender in senders {
            let is_audio = match sender.track().await {
                Some(current) => current.kind() == RTPCodecType::Audio,
                None => false,
            };
            if is_audio {
                sender.replace_track(Some(track.local_track())).await?;
                replaced = true;
            }
        }
        if !replaced {
            let sender = pc.add_track(track.local_track()).await?;
            self.senders.lock().push(sender);
        }

        for old in self.outbound.audio_tracks() {
            self.outbound.remove_track(&old);
        }
        self.outbound.add_track(track);
        Ok(())
    }

    /// Закрывает соединение и останавливает исходящие треки. Повторный вызов ничего не делает.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pc) = self.pc.get() {
            if let Err(e) = pc.close().await {
                tracing::warn!(target: "agent_room::peer", peer_id = %self.id, error = %e, "Failed to close peer connection");
            }
        }
        self.outbound.stop();
        self.data_channel.lock().take();
        tracing::info!(target: "agent_room::peer", peer_id = %self.id, "Peer closed");
    }
}

/// Отправка RPC через data-channel; link держится по слабой ссылке
struct LinkSink(Weak<PeerLink>);

#[async_trait]
impl MessageSink for LinkSink {
    async fn send_message(&self, raw: String) -> Result<(), String> {
        let link = self.0.upgrade().ok_or_else(|| "peer link dropped".to_string())?;
        link.send_message(&raw).await;
        Ok(())
    }
}
