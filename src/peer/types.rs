use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// ICE кандидат в том виде, в котором его передаёт браузерный WebRTC
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

/// Тип ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: IceServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Участник комнаты, как его описывает сервер сигналинга
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub self_description: String,
}

/// Ответ сервера на `join`
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinResponse {
    #[serde(default)]
    pub existing_peers: Vec<PeerInfo>,
}

impl JoinResponse {
    pub fn has_peer_described_as(&self, description: &str) -> bool {
        self.existing_peers
            .iter()
            .any(|p| p.self_description == description)
    }
}

/// Параметры `peer_added`
#[derive(Deserialize, Debug, Clone)]
pub struct PeerAddedParams {
    pub peer_id: String,
    pub self_description: String,
}

/// Параметры `connection_request` / `request_connection`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionRequestParams {
    pub peer_id: String,
    pub self_description: String,
    pub offer: RTCSessionDescription,
}

/// Ответ на `request_connection`; отсутствие `answer` означает отказ
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConnectionResponse {
    #[serde(default)]
    pub answer: Option<RTCSessionDescription>,
}

/// Параметры `add_ice_candidate` / `relay_ice_candidate`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IceCandidateParams {
    pub peer_id: String,
    pub candidate: IceCandidate,
}
