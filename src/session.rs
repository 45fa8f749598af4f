//! Rendezvous data model shared by the store, the relay and the clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::utils::random_code;

/// Number of characters in a session code
pub const SESSION_ID_LEN: usize = 6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("session id must be {SESSION_ID_LEN} characters, got {0}")]
    Length(usize),

    #[error("session id may only contain letters and digits")]
    Charset,
}

/// Short human-shareable session code, always upper case base-36
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_code(SESSION_ID_LEN))
    }

    /// Trims and upper-cases user input before validating it
    pub fn parse(raw: &str) -> Result<Self, SessionIdError> {
        let code = raw.trim().to_ascii_uppercase();
        let len = code.chars().count();
        if len != SESSION_ID_LEN {
            return Err(SessionIdError::Length(len));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SessionIdError::Charset);
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Peer role: `A` creates the session and the offer, `B` answers.
/// Lower case is accepted on input, in JSON as in query strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(alias = "a")]
    A,
    #[serde(alias = "b")]
    B,
}

impl Role {
    pub fn other(self) -> Self {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::A => "A",
            Role::B => "B",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("role must be \"A\" or \"B\", got {0:?}")]
pub struct RoleError(pub String);

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Role::A),
            "B" | "b" => Ok(Role::B),
            other => Err(RoleError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Connection description exchanged through the relay (browser
/// `RTCSessionDescriptionInit` shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate (browser `RTCIceCandidateInit` shape)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// Structural fingerprint: sha256 over the canonical JSON form.
    /// Candidates equal field by field always share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_else(|_| self.candidate.clone().into_bytes());
        hex::encode(Sha256::digest(&canonical))
    }
}

/// One rendezvous record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub candidates_a: Vec<IceCandidate>,
    pub candidates_b: Vec<IceCandidate>,
}

impl Session {
    pub fn new(id: SessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            offer: None,
            answer: None,
            candidates_a: Vec::new(),
            candidates_b: Vec::new(),
        }
    }

    /// Candidates published by `role`
    pub fn candidates(&self, role: Role) -> &[IceCandidate] {
        match role {
            Role::A => &self.candidates_a,
            Role::B => &self.candidates_b,
        }
    }

    pub fn candidates_mut(&mut self, role: Role) -> &mut Vec<IceCandidate> {
        match role {
            Role::A => &mut self.candidates_a,
            Role::B => &mut self.candidates_b,
        }
    }
}
