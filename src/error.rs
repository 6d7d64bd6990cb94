use thiserror::Error;

/// Ошибки JSON-RPC канала
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Timeout waiting for response to {method}")]
    Timeout { method: String },

    #[error("Error in response to {method}: {message}")]
    Remote { method: String, message: String },

    #[error("Channel closed while waiting for response to {method}")]
    Closed { method: String },

    #[error("Failed to send {method}: {reason}")]
    Send { method: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Ошибки медиа-потоков и устройств
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No audio input devices available")]
    NoDevices,

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("WebRTC media error: {0}")]
    WebRtc(#[from] webrtc::Error),
}

/// Ошибки одного peer-соединения
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer connection is not initialized")]
    NotInitialized,

    #[error("Peer connection is already initialized")]
    AlreadyInitialized,

    #[error("Peer connection is closed")]
    Closed,

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Ошибки комнаты (сигналинг + переговоры)
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Signaling transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("Invalid room state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Peer policy failed: {0}")]
    Policy(String),

    #[error("Invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },
}

/// Ошибки приглашения агента
#[derive(Debug, Error)]
pub enum InviteError {
    #[error("Failed to invite agent: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to invite agent: {0}")]
    Status(u16),
}

/// Ошибки уровня разговора; `Display` показывается пользователю как есть
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("{0}")]
    Media(#[from] MediaError),

    #[error("{0}")]
    Room(#[from] RoomError),

    #[error("{0}")]
    Invite(#[from] InviteError),
}

/// Ошибки конфигурации
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
