use crate::config::IceConfig;
use crate::logger::trace_candidate;
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// API с кодеками и интерсепторами по умолчанию
pub fn new_api() -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(ice: &IceConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(&ice.servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Перевод серверов из конфигурации в формат webrtc
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Локальный кандидат в виде для пересылки через сигналинг
pub fn local_candidate(peer_id: &str, cand: &RTCIceCandidate) -> Option<IceCandidate> {
    match cand.to_json() {
        Ok(init) => {
            let candidate = IceCandidate::from(init);
            trace_candidate("LOCAL", peer_id, &candidate);
            Some(candidate)
        }
        Err(e) => {
            tracing::warn!(target: "agent_room::ice", peer_id, error = %e, "Failed to serialize local candidate");
            None
        }
    }
}

/// Опрашивает `check` с шагом `interval`, пока тот не вернёт значение или не выйдет `limit`
pub async fn wait_for<T, F, Fut>(interval: Duration, limit: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + limit;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(interval).await;
    }
}
