//! # Signaling relay
//!
//! Stateless operations over a [`SignalingStore`]. Each operation validates
//! its input and performs exactly one store call; nothing is cached between
//! requests.
//!
//! Publishing into an unknown session is [`RelayError::NotFound`], while
//! polling fetches against an unknown session return an empty result:
//! a client probes repeatedly before its counterpart has published anything,
//! and that is a normal state rather than a failure.

use std::sync::Arc;

use tracing::{debug, info};

use crate::session::{IceCandidate, Role, SdpKind, SessionDescription, SessionId};
use crate::store::{SignalingStore, StoreError};

pub mod error;
pub mod routes;
pub mod server;

pub use error::RelayError;
pub use routes::router;

#[derive(Clone)]
pub struct Relay {
    store: Arc<dyn SignalingStore>,
}

impl Relay {
    pub fn new(store: Arc<dyn SignalingStore>) -> Self {
        Self { store }
    }

    pub async fn create_session(&self) -> Result<SessionId, RelayError> {
        let id = self.store.create_session().await?;
        info!("Session created: {id}");
        Ok(id)
    }

    pub async fn close_session(&self, session_id: &str) -> Result<(), RelayError> {
        let id = parse_session_id(session_id)?;
        self.store.delete(&id).await?;
        Ok(())
    }

    pub async fn publish_offer(
        &self,
        session_id: &str,
        offer: SessionDescription,
    ) -> Result<(), RelayError> {
        let id = parse_session_id(session_id)?;
        check_description(&offer, SdpKind::Offer)?;

        self.store.set_offer(&id, &offer).await?;
        info!("Offer stored for session {id}");
        Ok(())
    }

    pub async fn fetch_offer(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionDescription>, RelayError> {
        let id = parse_session_id(session_id)?;
        let offer = or_empty(self.store.get_offer(&id).await)?.flatten();
        debug!("Fetch offer for session {id}: present={}", offer.is_some());
        Ok(offer)
    }

    pub async fn publish_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), RelayError> {
        let id = parse_session_id(session_id)?;
        check_description(&answer, SdpKind::Answer)?;

        self.store.set_answer(&id, &answer).await?;
        info!("Answer stored for session {id}");
        Ok(())
    }

    pub async fn fetch_answer(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionDescription>, RelayError> {
        let id = parse_session_id(session_id)?;
        let answer = or_empty(self.store.get_answer(&id).await)?.flatten();
        debug!("Fetch answer for session {id}: present={}", answer.is_some());
        Ok(answer)
    }

    /// Appends to the queue of the publishing `role`
    pub async fn publish_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: IceCandidate,
    ) -> Result<(), RelayError> {
        let id = parse_session_id(session_id)?;
        if candidate.candidate.trim().is_empty() {
            return Err(RelayError::Validation("candidate must not be empty".into()));
        }

        self.store.append_candidate(&id, role, &candidate).await?;
        debug!("Candidate stored for session {id}, role {role}");
        Ok(())
    }

    /// Returns the counterpart's queue: `A` reads what `B` published and
    /// the other way round
    pub async fn fetch_candidates(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<Vec<IceCandidate>, RelayError> {
        let id = parse_session_id(session_id)?;
        let candidates = or_empty(self.store.list_candidates(&id, role.other()).await)?
            .unwrap_or_default();
        Ok(candidates)
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, RelayError> {
    if raw.trim().is_empty() {
        return Err(RelayError::Validation("sessionId is required".into()));
    }
    SessionId::parse(raw).map_err(|e| RelayError::Validation(e.to_string()))
}

fn check_description(desc: &SessionDescription, expected: SdpKind) -> Result<(), RelayError> {
    if desc.kind != expected {
        return Err(RelayError::Validation(format!(
            "expected description of type {expected:?}, got {:?}",
            desc.kind
        )));
    }
    if desc.sdp.trim().is_empty() {
        return Err(RelayError::Validation("sdp must not be empty".into()));
    }
    Ok(())
}

/// Polling reads: an absent session is an empty result, store failures
/// still propagate
fn or_empty<T>(result: Result<T, StoreError>) -> Result<Option<T>, RelayError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
