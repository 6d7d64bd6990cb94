//! Исходящие медиа-потоки.
//!
//! Захват звука остаётся на стороне приложения: оно пишет готовые
//! Opus-семплы в [`MediaTrack::write_sample`]. Выключенный или остановленный
//! трек семплы молча отбрасывает.

use crate::error::MediaError;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    device_id: Option<String>,
    local: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Один исходящий трек; клоны разделяют состояние
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

pub fn opus_codec() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

impl MediaTrack {
    /// Аудиотрек Opus для указанного потока
    pub fn opus_audio(stream_id: &str, device_id: Option<String>) -> Self {
        let id = format!("audio-{}", random_id());
        let local = Arc::new(TrackLocalStaticSample::new(
            opus_codec(),
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind: TrackKind::Audio,
                device_id,
                local,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "agent_room::media", track = %self.inner.id, "track stopped");
        }
    }

    pub fn is_same(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn local_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.local.clone()
    }

    /// Пишет закодированный семпл; `Ok(false)` если трек выключен или остановлен
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool, MediaError> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(false);
        }
        self.inner
            .local
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }
}

/// Набор исходящих треков; клоны разделяют список треков
#[derive(Clone, Debug)]
pub struct MediaStream {
    id: String,
    tracks: Arc<Mutex<Vec<MediaTrack>>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Поток без треков
    pub fn empty() -> Self {
        Self::new(format!("stream-{}", random_id()))
    }

    /// Поток с одним аудиотреком Opus
    pub fn opus_audio(device_id: Option<String>) -> Self {
        let stream = Self::empty();
        stream.add_track(MediaTrack::opus_audio(&stream.id, device_id));
        stream
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().clone()
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks
            .lock()
            .iter()
            .filter(|t| t.kind() == TrackKind::Audio)
            .cloned()
            .collect()
    }

    pub fn add_track(&self, track: MediaTrack) {
        self.tracks.lock().push(track);
    }

    pub fn remove_track(&self, track: &MediaTrack) {
        self.tracks.lock().retain(|t| !t.is_same(track));
    }

    /// Останавливает все треки потока
    pub fn stop(&self) {
        for track in self.tracks.lock().iter() {
            track.stop();
        }
    }
}

/// Устройство ввода звука
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub device_id: String,
    pub label: String,
}

/// Источник исходящих потоков: перечисление устройств и открытие потока
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Перечисляет устройства ввода звука
    async fn initialize(&self) -> Result<Vec<AudioDevice>, MediaError>;

    /// Открывает поток для устройства (или устройства по умолчанию)
    async fn open_stream(&self, device_id: Option<&str>) -> Result<MediaStream, MediaError>;

    /// Останавливает всё, что было открыто
    fn cleanup(&self);
}

/// Источник Opus-треков, которые наполняет конвейер захвата приложения
pub struct OpusTrackSource {
    devices: Vec<AudioDevice>,
    opened: Mutex<Vec<MediaStream>>,
}

impl OpusTrackSource {
    pub fn new(devices: Vec<AudioDevice>) -> Self {
        Self {
            devices,
            opened: Mutex::new(Vec::new()),
        }
    }
}

impl Default for OpusTrackSource {
    fn default() -> Self {
        Self::new(vec![AudioDevice {
            device_id: "default".into(),
            label: "Default microphone".into(),
        }])
    }
}

#[async_trait]
impl MediaSource for OpusTrackSource {
    async fn initialize(&self) -> Result<Vec<AudioDevice>, MediaError> {
        if self.devices.is_empty() {
            return Err(MediaError::NoDevices);
        }
        tracing::debug!(target: "agent_room::media", count = self.devices.len(), "Audio devices found");
        Ok(self.devices.clone())
    }

    async fn open_stream(&self, device_id: Option<&str>) -> Result<MediaStream, MediaError> {
        let device = match device_id {
            Some(id) => self
                .devices
                .iter()
                .find(|d| d.device_id == id)
                .ok_or_else(|| MediaError::DeviceNotFound(id.to_owned()))?,
            None => self.devices.first().ok_or(MediaError::NoDevices)?,
        };

        let stream = MediaStream::opus_audio(Some(device.device_id.clone()));
        tracing::debug!(target: "agent_room::media", stream = %stream.id(), device = %device.device_id, "Media stream obtained");
        self.opened.lock().push(stream.clone());
        Ok(stream)
    }

    fn cleanup(&self) {
        for stream in self.opened.lock().drain(..) {
            stream.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_track_drops_samples() {
        let stream = MediaStream::opus_audio(None);
        let track = stream.audio_tracks().remove(0);

        track.set_enabled(false);
        let written = track
            .write_sample(Bytes::from_static(&[0u8; 10]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!written);

        track.set_enabled(true);
        stream.stop();
        assert!(track.is_stopped());
        let written = track
            .write_sample(Bytes::from_static(&[0u8; 10]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!written);
    }

    #[tokio::test]
    async fn test_source_opens_stream_for_device() {
        let source = OpusTrackSource::new(vec![
            AudioDevice {
                device_id: "mic-1".into(),
                label: "Built-in".into(),
            },
            AudioDevice {
                device_id: "mic-2".into(),
                label: "Headset".into(),
            },
        ]);

        let devices = source.initialize().await.unwrap();
        assert_eq!(devices.len(), 2);

        let stream = source.open_stream(Some("mic-2")).await.unwrap();
        assert_eq!(stream.audio_tracks()[0].device_id(), Some("mic-2"));

        assert!(matches!(
            source.open_stream(Some("missing")).await,
            Err(MediaError::DeviceNotFound(_))
        ));

        source.cleanup();
        assert!(stream.audio_tracks()[0].is_stopped());
    }

    #[tokio::test]
    async fn test_source_without_devices() {
        let source = OpusTrackSource::new(vec![]);
        assert!(matches!(source.initialize().await, Err(MediaError::NoDevices)));
    }

    #[test]
    fn test_remove_track() {
        let stream = MediaStream::opus_audio(None);
        let track = stream.tracks().remove(0);
        stream.remove_track(&track);
        assert!(stream.tracks().is_empty());
    }
}
