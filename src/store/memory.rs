//! Process-local store. Sessions are invisible to other relay instances, so
//! this backs tests and single-process development only.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use super::{SignalingStore, StoreError, MAX_CREATE_ATTEMPTS};
use crate::session::{IceCandidate, Role, Session, SessionDescription, SessionId};

struct Entry {
    session: Session,
    expires_at: Instant,
}

pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn with_live<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, StoreError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;

        let expired = match sessions.get(id) {
            None => return Err(StoreError::NotFound),
            Some(entry) => entry.expires_at <= Instant::now(),
        };
        if expired {
            sessions.remove(id);
            return Err(StoreError::NotFound);
        }

        sessions
            .get_mut(id)
            .map(|entry| f(&mut entry.session))
            .ok_or(StoreError::NotFound)
    }

    /// Number of sessions held, expired ones included until swept
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(&self) -> Result<SessionId, StoreError> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;

        let now = Instant::now();
        sessions.retain(|_, entry| entry.expires_at > now);

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let id = SessionId::generate();
            if sessions.contains_key(&id) {
                continue;
            }
            sessions.insert(
                id.clone(),
                Entry {
                    session: Session::new(id.clone(), Utc::now()),
                    expires_at: now + self.ttl,
                },
            );
            return Ok(id);
        }

        Err(StoreError::Unavailable(
            "could not allocate an unused session code".into(),
        ))
    }

    async fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.with_live(id, |s| s.clone())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.with_live(id, |_| ())?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        sessions.remove(id);
        Ok(())
    }

    async fn set_offer(
        &self,
        id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<(), StoreError> {
        self.with_live(id, |s| s.offer = Some(offer.clone()))
    }

    async fn get_offer(&self, id: &SessionId) -> Result<Option<SessionDescription>, StoreError> {
        self.with_live(id, |s| s.offer.clone())
    }

    async fn set_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), StoreError> {
        self.with_live(id, |s| s.answer = Some(answer.clone()))
    }

    async fn get_answer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, StoreError> {
        self.with_live(id, |s| s.answer.clone())
    }

    async fn append_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), StoreError> {
        self.with_live(id, |s| s.candidates_mut(role).push(candidate.clone()))
    }

    async fn list_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, StoreError> {
        self.with_live(id, |s| s.candidates(role).to_vec())
    }
}
