pub mod message;
pub mod transport;

pub use message::{Frame, SignalingMessage, HEARTBEAT};
pub use transport::{ConnectionState, SignalingClient, SignalingSink};
