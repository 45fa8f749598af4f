pub mod connection;
pub mod data_channel;
pub mod handshake;
pub mod ice;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::WebRtcConnector;
pub use handshake::Handshake;
pub use state::Attempt;
pub use transport::{Connector, PeerTransport};
pub use types::{
    ConnectionState, HandshakeError, HandshakeEvent, Place, ServerConfig, SwipeMessage,
    SwipeValue, TransportError, TransportEvent,
};
