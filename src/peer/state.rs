//! Per-attempt handshake state.
//!
//! Owned exclusively by one attempt and never shared across attempts or
//! peers. All transitions go through the methods below; the driver in
//! [`super::handshake`] only performs the I/O they call for.

use std::collections::{HashSet, VecDeque};

use thiserror::Error;

use crate::peer::types::ConnectionState;
use crate::session::{IceCandidate, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid transition from {from} on {event}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub event: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionState {
    None,
    Set,
}

/// What to do with a candidate fetched from the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateAction {
    /// First sighting and the remote description is set
    Apply(IceCandidate),
    /// First sighting, held until the remote description is set
    Deferred,
    /// Seen before
    Duplicate,
}

#[derive(Debug)]
pub struct Attempt {
    role: Role,
    state: ConnectionState,
    local_description: DescriptionState,
    remote_description: DescriptionState,
    channel_ready: bool,
    seen_candidates: HashSet<String>,
    pending_remote: Vec<IceCandidate>,
    outbound: VecDeque<String>,
}

impl Attempt {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: ConnectionState::Idle,
            local_description: DescriptionState::None,
            remote_description: DescriptionState::None,
            channel_ready: false,
            seen_candidates: HashSet::new(),
            pending_remote: Vec::new(),
            outbound: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_channel_ready(&self) -> bool {
        self.channel_ready
    }

    pub fn local_description(&self) -> DescriptionState {
        self.local_description
    }

    pub fn remote_description(&self) -> DescriptionState {
        self.remote_description
    }

    /// Distinct remote candidates accepted so far
    pub fn applied_count(&self) -> usize {
        self.seen_candidates.len()
    }

    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError {
            from: self.state,
            event,
        }
    }

    /// `idle -> connecting`
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ConnectionState::Idle => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("begin")),
        }
    }

    pub fn set_local_description(&mut self) {
        self.local_description = DescriptionState::Set;
    }

    /// Marks the remote description as applied and hands back the
    /// candidates that arrived before it, in arrival order
    pub fn set_remote_description(&mut self) -> Vec<IceCandidate> {
        self.remote_description = DescriptionState::Set;
        std::mem::take(&mut self.pending_remote)
    }

    /// Records the fingerprint on first sighting so a candidate is applied
    /// at most once, however often it is polled
    pub fn accept_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateAction {
        if !self.seen_candidates.insert(candidate.fingerprint()) {
            return CandidateAction::Duplicate;
        }

        match self.remote_description {
            DescriptionState::Set => CandidateAction::Apply(candidate),
            DescriptionState::None => {
                self.pending_remote.push(candidate);
                CandidateAction::Deferred
            }
        }
    }

    /// `connecting -> channel-open`
    pub fn channel_opened(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::ChannelOpen;
                self.channel_ready = true;
                Ok(())
            }
            _ => Err(self.invalid("channel-open")),
        }
    }

    /// `idle | connecting | channel-open -> closed`; returns the state left
    pub fn close(&mut self) -> Result<ConnectionState, TransitionError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Connecting | ConnectionState::ChannelOpen => {
                let previous = self.state;
                self.state = ConnectionState::Closed;
                self.channel_ready = false;
                Ok(previous)
            }
            _ => Err(self.invalid("close")),
        }
    }

    /// `connecting -> failed`, absorbing
    pub fn fail(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Failed;
                self.channel_ready = false;
                Ok(())
            }
            _ => Err(self.invalid("fail")),
        }
    }

    pub fn enqueue(&mut self, payload: String) {
        self.outbound.push_back(payload);
    }

    pub fn next_outbound(&mut self) -> Option<String> {
        self.outbound.pop_front()
    }

    /// Puts back a message whose send failed, ahead of everything queued
    /// after it
    pub fn requeue_front(&mut self, payload: String) {
        self.outbound.push_front(payload);
    }

    /// Drops everything held for this attempt
    pub fn clear(&mut self) {
        self.seen_candidates.clear();
        self.pending_remote.clear();
        self.outbound.clear();
    }
}
