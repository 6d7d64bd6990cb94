pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod state;
pub mod types;

pub use connection::{InboundStream, PeerLink, DATA_CHANNEL_LABEL};
pub use state::PeerRegistry;
pub use types::{IceCandidate, IceServerKind, JoinResponse, PeerInfo, ServerConfig};
