use crate::config::LoggingConfig;
use crate::peer::types::IceCandidate;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Инициализация логирования с временными метками.
///
/// `RUST_LOG` имеет приоритет над уровнем из конфигурации. Повторный вызов
/// ничего не делает.
pub fn init_logging(config: &LoggingConfig) {
    // Проверяем конфигурацию логирования
    if !config.enabled {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let _ = tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn trace_candidate(label: &str, peer_id: &str, cand: &IceCandidate) {
    tracing::trace!(
        target: "agent_room::ice",
        peer_id,
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.username_fragment
    );
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, peer_id: &str, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                tracing::debug!(
                    target: "agent_room::ice",
                    peer_id,
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
