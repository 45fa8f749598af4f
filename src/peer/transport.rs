//! Seam between the handshake driver and the actual peer connection.
//!
//! The driver only talks to [`PeerTransport`]; the `webrtc` crate backed
//! implementation lives in [`super::connection`].

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::peer::types::{TransportError, TransportEvent};
use crate::session::{IceCandidate, Role, SessionDescription};

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Builds the local offer and sets it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Sets the remote offer, then builds and sets the local answer
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Sends one text frame over the data channel
    async fn send_text(&self, payload: &str) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Creates one transport per attempt. Events raised by the transport
/// (local candidates, channel lifecycle, inbound text) go to `events`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        role: Role,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, TransportError>;
}
