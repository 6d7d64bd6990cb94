use crate::config::{load_settings, Settings};
use crate::conversation::AgentConversationController;
use crate::error::ConfigError;
use crate::invite::{AgentInviter, HttpAgentInviter};
use crate::logger::init_logging;
use crate::media::{MediaSource, OpusTrackSource};
use crate::signaling::{SignalingConnector, WebSocketConnector};
use std::sync::Arc;

/// Корень приложения: настройки и единственный контроллер разговора
pub struct AppContext {
    settings: Settings,
    controller: AgentConversationController,
}

impl AppContext {
    /// Сборка с WebSocket-сигналингом, HTTP-приглашением и Opus-источником по умолчанию
    pub fn new(settings: Settings) -> Self {
        let inviter = Arc::new(HttpAgentInviter::new(&settings.agent_server));
        Self::with_parts(
            settings,
            Arc::new(OpusTrackSource::default()),
            inviter,
            Arc::new(WebSocketConnector),
        )
    }

    pub fn with_parts(
        settings: Settings,
        media: Arc<dyn MediaSource>,
        inviter: Arc<dyn AgentInviter>,
        connector: Arc<dyn SignalingConnector>,
    ) -> Self {
        let controller =
            AgentConversationController::new(settings.clone(), media, inviter, connector);
        Self {
            settings,
            controller,
        }
    }

    /// Загружает настройки, включает логирование и собирает контекст
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = load_settings(config_path)?;
        init_logging(&settings.logging);
        tracing::debug!(
            target: "agent_room::app",
            signaling = %settings.signaling.socket_url(),
            agent_server = %settings.agent_server.url,
            ice_servers = settings.ice.servers.len(),
            "Configuration loaded"
        );
        Ok(Self::new(settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn controller(&self) -> &AgentConversationController {
        &self.controller
    }
}
