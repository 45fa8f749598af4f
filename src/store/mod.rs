//! # Signaling store
//!
//! One TTL-bound record per session code. Each field has exactly one
//! legitimate writer role (offer: `A`, answer: `B`, candidate queue per
//! role), so writers never contend on the same field and no locking is
//! needed beyond the backend's own atomic per-key upsert.
//!
//! Reads against an absent or expired session return
//! [`StoreError::NotFound`]. Backend failures are
//! [`StoreError::Unavailable`] and must never be folded into `NotFound`.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{IceCandidate, Role, Session, SessionDescription, SessionId};

#[cfg(feature = "memory-store")]
pub mod memory;
pub mod redis;

#[cfg(feature = "memory-store")]
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Attempts at drawing an unused session code before giving up
pub const MAX_CREATE_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SignalingStore: Send + Sync + 'static {
    /// Creates an empty session under a fresh code
    async fn create_session(&self) -> Result<SessionId, StoreError>;

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Explicit teardown
    async fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    async fn set_offer(&self, id: &SessionId, offer: &SessionDescription)
        -> Result<(), StoreError>;

    async fn get_offer(&self, id: &SessionId) -> Result<Option<SessionDescription>, StoreError>;

    async fn set_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), StoreError>;

    async fn get_answer(&self, id: &SessionId)
        -> Result<Option<SessionDescription>, StoreError>;

    async fn append_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), StoreError>;

    /// Candidates published by `role`, in publish order
    async fn list_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, StoreError>;
}
