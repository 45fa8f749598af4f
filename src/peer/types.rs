use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::session::IceCandidate;

/// ICE server entry (`stun` or `turn`)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerConfigError {
    #[error("server url cannot be empty")]
    EmptyUrl,

    #[error("TURN server {0} requires username and credential")]
    MissingTurnCredentials(String),
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    /// Public Google STUN servers
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::stun("default-stun-0", "stun:stun.l.google.com:19302"),
            Self::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
            Self::stun("default-stun-2", "stun:stun2.l.google.com:19302"),
        ]
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.url.trim().is_empty() {
            return Err(ServerConfigError::EmptyUrl);
        }
        if self.r#type == "turn" && (self.username.is_none() || self.credential.is_none()) {
            return Err(ServerConfigError::MissingTurnCredentials(self.url.clone()));
        }
        Ok(())
    }
}

/// Lifecycle of one handshake attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    ChannelOpen,
    Closed,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::ChannelOpen => write!(f, "channel-open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Errors reported through the handshake error observable. None of them is
/// fatal to the process; the caller decides whether to start a new attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("connection construction failed: {0}")]
    Construction(String),

    #[error("description exchange failed: {0}")]
    Exchange(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("handshake is closed")]
    Closed,
}

/// Notifications for subscribers of a handshake
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEvent {
    StateChanged(ConnectionState),
    Connected,
    Disconnected,
    Message(SwipeMessage),
    Error(HandshakeError),
}

/// Raised by a peer transport towards the handshake driver
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    ChannelOpen,
    ChannelClosed,
    ChannelError(String),
    Message(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer connection setup failed: {0}")]
    Setup(String),

    #[error("description rejected: {0}")]
    Description(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    #[error("data channel not ready")]
    NotReady,

    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Place card shared between the peers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    pub name: String,
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_level: Option<u8>,
    #[serde(alias = "vicinity")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub location: GeoPoint,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwipeValue {
    Like,
    Nope,
}

/// Application payload carried over the data channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum SwipeMessage {
    Places { places: Vec<Place> },
    Swipe { index: usize, value: SwipeValue },
    Done { likes: Vec<usize> },
}

impl SwipeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SwipeMessage::Places { .. } => "PLACES",
            SwipeMessage::Swipe { .. } => "SWIPE",
            SwipeMessage::Done { .. } => "DONE",
        }
    }
}
