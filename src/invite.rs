use crate::config::AgentServerConfig;
use crate::error::InviteError;
use async_trait::async_trait;
use serde::Serialize;

/// Приглашение агента в комнату
#[async_trait]
pub trait AgentInviter: Send + Sync {
    async fn invite(&self, context_id: &str) -> Result<(), InviteError>;
}

#[derive(Serialize)]
struct InviteRequest<'a> {
    context_id: &'a str,
}

/// `POST {agent_server}/invite-agent`; повторов нет
pub struct HttpAgentInviter {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpAgentInviter {
    pub fn new(config: &AgentServerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/invite-agent", config.url.trim_end_matches('/')),
            access_token: config.access_token.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentInviter for HttpAgentInviter {
    async fn invite(&self, context_id: &str) -> Result<(), InviteError> {
        tracing::info!(target: "agent_room::invite", context_id, endpoint = %self.endpoint, "Inviting agent");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&InviteRequest { context_id });
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::error!(target: "agent_room::invite", status, "Error inviting agent");
            return Err(InviteError::Status(status));
        }

        tracing::info!(target: "agent_room::invite", "Agent invited successfully");
        Ok(())
    }
}
