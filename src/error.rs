use crate::peer::engine::EngineError;
use crate::peer::types::PeerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("a session for peer {0} already exists")]
    DuplicateSession(PeerId),

    #[error("unknown signaling message type: {0}")]
    UnknownMessageType(String),

    #[error("malformed signaling message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("{op} failed for peer {peer_id}: {source}")]
    Engine {
        op: &'static str,
        peer_id: PeerId,
        #[source]
        source: EngineError,
    },

    #[error("could not initialize media engine: {0}")]
    EngineInit(#[source] EngineError),

    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("invalid ICE server {id}: {reason}")]
    InvalidIceServer { id: String, reason: String },

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("call manager is no longer running")]
    ManagerStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CallError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
