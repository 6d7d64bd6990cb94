// Конфигурация приложения
// Логирование по умолчанию включено только в режиме разработки

use crate::error::ConfigError;
use crate::peer::types::{IceServerKind, ServerConfig};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Префикс переменных окружения
pub const ENV_PREFIX: &str = "AGENT_ROOM";

/// Основные настройки
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub signaling: SignalingConfig,

    #[serde(default)]
    pub agent_server: AgentServerConfig,

    #[serde(default)]
    pub ice: IceConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub room: RoomConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub url: String,
    pub path: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".into(),
            path: "/ws".into(),
        }
    }
}

impl SignalingConfig {
    /// Полный адрес сокета сигналинга
    pub fn socket_url(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentServerConfig {
    pub url: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Default for AgentServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".into(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<ServerConfig>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerConfig {
                id: "default-stun".into(),
                r#type: IceServerKind::Stun,
                url: "stun:stun.relay.metered.ca:80".into(),
                username: None,
                credential: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub call_timeout_ms: u64,
    /// Запрос соединения ждёт решения другой стороны, поэтому таймаут больше
    pub request_connection_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5000,
            request_connection_timeout_ms: 10_000,
        }
    }
}

impl RpcConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn request_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.request_connection_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub self_description: String,
    pub agent_description: String,
    pub ice_wait_interval_ms: u64,
    pub ice_wait_timeout_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            self_description: "User".into(),
            agent_description: "Agent".into(),
            ice_wait_interval_ms: 100,
            ice_wait_timeout_ms: 10_000,
        }
    }
}

impl RoomConfig {
    pub fn ice_wait_interval(&self) -> Duration {
        Duration::from_millis(self.ice_wait_interval_ms)
    }

    pub fn ice_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_wait_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Задержка очистки списка предложений после `stoped_speaking`
    pub message_clear_delay_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            message_clear_delay_ms: 2000,
        }
    }
}

impl ConversationConfig {
    pub fn message_clear_delay(&self) -> Duration {
        Duration::from_millis(self.message_clear_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            level: "info".into(),
        }
    }
}

impl Settings {
    /// Проверка настроек
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Валидация серверов
        for server in &self.ice.servers {
            if server.url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("ice.servers.{}", server.id),
                    message: "Server URL cannot be empty".into(),
                });
            }

            if server.r#type == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("ice.servers.{}", server.id),
                    message: "TURN servers require username and credential".into(),
                });
            }
        }

        let timeouts = [
            ("rpc.call_timeout_ms", self.rpc.call_timeout_ms),
            (
                "rpc.request_connection_timeout_ms",
                self.rpc.request_connection_timeout_ms,
            ),
            ("room.ice_wait_interval_ms", self.room.ice_wait_interval_ms),
            ("room.ice_wait_timeout_ms", self.room.ice_wait_timeout_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }

        if self.signaling.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "signaling.url".into(),
                message: "Signaling URL cannot be empty".into(),
            });
        }

        Ok(())
    }
}

/// Загрузка настроек из файла и окружения
///
/// Приоритет (от высшего к низшему):
/// 1. переменные окружения `AGENT_ROOM__*`
/// 2. файл `path` (или `config/default`, если путь не задан)
/// 3. значения по умолчанию
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(p) => File::with_name(p).required(true),
        None => File::with_name("config/default").required(false),
    };

    let settings: Settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.rpc.call_timeout_ms, 5000);
        assert_eq!(settings.rpc.request_connection_timeout_ms, 10_000);
        assert_eq!(settings.room.self_description, "User");
        assert_eq!(settings.conversation.message_clear_delay_ms, 2000);
        assert_eq!(settings.signaling.socket_url(), "ws://localhost:8080/ws");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_turn_requires_credentials() {
        let mut settings = Settings::default();
        settings.ice.servers.push(ServerConfig {
            id: "turn".into(),
            r#type: IceServerKind::Turn,
            url: "global.relay.metered.ca:80".into(),
            username: Some("user".into()),
            credential: None,
        });
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut settings = Settings::default();
        settings.room.ice_wait_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[signaling]
url = "wss://signal.example.com/"
path = "/ws"

[rpc]
call_timeout_ms = 2500
request_connection_timeout_ms = 8000

[[ice.servers]]
id = "turn-1"
type = "turn"
url = "turn:global.relay.metered.ca:443"
username = "user"
credential = "secret"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.signaling.socket_url(), "wss://signal.example.com/ws");
        assert_eq!(settings.rpc.call_timeout_ms, 2500);
        assert_eq!(settings.ice.servers.len(), 1);
        assert_eq!(settings.ice.servers[0].r#type, IceServerKind::Turn);
        assert_eq!(settings.room.agent_description, "Agent");
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[rpc]\ncall_timeout_ms = 2500").unwrap();
        std::env::set_var("AGENT_ROOM__LOGGING__LEVEL", "debug");

        let path = file.path().to_str().unwrap().to_string();
        let settings = load_settings(Some(&path)).unwrap();
        std::env::remove_var("AGENT_ROOM__LOGGING__LEVEL");

        assert_eq!(settings.rpc.call_timeout_ms, 2500);
        assert_eq!(settings.rpc.request_connection_timeout_ms, 10_000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.enabled, LOGGING_ENABLED);
        assert_eq!(settings.signaling.socket_url(), "ws://localhost:8080/ws");
    }
}
