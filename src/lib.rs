pub mod app;
pub mod config;
pub mod conversation;
pub mod error;
pub mod invite;
pub mod logger;
pub mod media;
pub mod peer;
pub mod rpc;
pub mod session;
pub mod signaling;
pub mod utils;

pub use app::AppContext;
pub use config::{load_settings, Settings};
pub use conversation::{AgentConversationController, AiSentence, ConversationState};
pub use error::{ConfigError, ConversationError, InviteError, MediaError, PeerError, RoomError, RpcError};
pub use peer::PeerLink;
pub use rpc::{MessageSink, RpcChannel};
pub use session::{DefaultPeerPolicy, NegotiationOutcome, PeerPolicy, RoomSession, RoomState};
pub use signaling::{ChannelConnector, SignalingConnector, WebSocketConnector};
