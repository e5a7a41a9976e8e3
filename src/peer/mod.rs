pub mod connection;
pub mod engine;
pub mod ice;
pub mod registry;
pub mod session;
pub mod state;
pub mod types;

pub use connection::{RtcTrack, WebRtcEngine, WebRtcPeer};
pub use engine::{EngineError, MediaTrack, PeerConnection, PeerConnectionState, RtcEngine};
pub use registry::SessionRegistry;
pub use session::{EventSink, Session, SessionEvent, SessionEventKind, SessionId, SessionState};
pub use state::{LocalStream, PendingOffer};
pub use types::{CodecCapability, IceCandidate, IceServer, MediaKind, PeerId, ServerConfig};
