#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use swipe_signal::config::HandshakeConfig;
use swipe_signal::peer::types::{ConnectionState, TransportError, TransportEvent};
use swipe_signal::peer::{Connector, Handshake, PeerTransport};
use swipe_signal::relay::Relay;
use swipe_signal::session::{IceCandidate, Role, SessionDescription, SessionId};
use swipe_signal::signaling::{SignalingApi, SignalingError};
use swipe_signal::store::MemoryStore;

pub fn relay() -> Relay {
    Relay::new(Arc::new(MemoryStore::new(Duration::from_secs(3600))))
}

pub fn host_candidate(role: Role, n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{role}{n} 1 udp 2122260223 192.0.2.{n} 5440{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// In-memory stand-in for two peer connections. Each transport announces
/// two local candidates once its local description exists and reports its
/// channel open on the first remote candidate it is given.
#[derive(Default)]
pub struct MockNetwork {
    peers: Mutex<HashMap<Role, UnboundedSender<TransportEvent>>>,
    sent: Mutex<HashMap<Role, Vec<String>>>,
    applied: Mutex<HashMap<Role, Vec<IceCandidate>>>,
    opened: Mutex<HashSet<Role>>,
    closed: Mutex<Vec<Role>>,
    failing_sends: Mutex<HashMap<Role, usize>>,
    pub fail_connect: AtomicBool,
    /// channels only open through [`MockNetwork::open`]
    pub hold_open: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector(self.clone()))
    }

    pub fn sent(&self, role: Role) -> Vec<String> {
        self.sent.lock().unwrap().get(&role).cloned().unwrap_or_default()
    }

    pub fn applied(&self, role: Role) -> Vec<IceCandidate> {
        self.applied
            .lock()
            .unwrap()
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    pub fn closed(&self) -> Vec<Role> {
        self.closed.lock().unwrap().clone()
    }

    pub fn fail_next_sends(&self, role: Role, n: usize) {
        self.failing_sends.lock().unwrap().insert(role, n);
    }

    /// Raises the channel-open event for `role`
    pub fn open(&self, role: Role) {
        if self.opened.lock().unwrap().insert(role) {
            self.emit(role, TransportEvent::ChannelOpen);
        }
    }

    /// Delivers raw text to `role` as if the partner had sent it
    pub fn inject(&self, role: Role, text: &str) {
        self.emit(role, TransportEvent::Message(text.to_string()));
    }

    fn emit(&self, role: Role, event: TransportEvent) {
        if let Some(tx) = self.peers.lock().unwrap().get(&role) {
            let _ = tx.send(event);
        }
    }
}

struct MockConnector(Arc<MockNetwork>);

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        role: Role,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, TransportError> {
        if self.0.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Setup("no network".into()));
        }
        self.0.peers.lock().unwrap().insert(role, events);
        Ok(Box::new(MockTransport {
            role,
            net: self.0.clone(),
        }))
    }
}

struct MockTransport {
    role: Role,
    net: Arc<MockNetwork>,
}

impl MockTransport {
    fn gather(&self) {
        for n in 1..=2 {
            self.net.emit(
                self.role,
                TransportEvent::LocalCandidate(host_candidate(self.role, n)),
            );
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.gather();
        Ok(SessionDescription::offer(format!("v=0 offer-{}", self.role)))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if offer.sdp.is_empty() {
            return Err(TransportError::Description("empty offer".into()));
        }
        self.gather();
        Ok(SessionDescription::answer(format!("v=0 answer-{}", self.role)))
    }

    async fn apply_answer(&self, _answer: SessionDescription) -> Result<(), TransportError> {
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.net
            .applied
            .lock()
            .unwrap()
            .entry(self.role)
            .or_default()
            .push(candidate);
        if !self.net.hold_open.load(Ordering::SeqCst) {
            self.net.open(self.role);
        }
        Ok(())
    }

    async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
        {
            let mut failing = self.net.failing_sends.lock().unwrap();
            if let Some(n) = failing.get_mut(&self.role) {
                if *n > 0 {
                    *n -= 1;
                    return Err(TransportError::NotReady);
                }
            }
        }
        self.net
            .sent
            .lock()
            .unwrap()
            .entry(self.role)
            .or_default()
            .push(payload.to_string());
        self.net
            .emit(self.role.other(), TransportEvent::Message(payload.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.net.closed.lock().unwrap().push(self.role);
        self.net.peers.lock().unwrap().remove(&self.role);
        self.net.emit(self.role.other(), TransportEvent::ChannelClosed);
    }
}

/// Relay client that counts calls per operation and can fail candidate
/// fetches on demand
pub struct CountingSignaling {
    inner: Relay,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing_candidate_fetches: AtomicUsize,
}

impl CountingSignaling {
    pub fn new(inner: Relay) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            failing_candidate_fetches: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn fail_candidate_fetches(&self, n: usize) {
        self.failing_candidate_fetches.store(n, Ordering::SeqCst);
    }

    fn count(&self, op: &'static str) {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
    }
}

#[async_trait]
impl SignalingApi for CountingSignaling {
    async fn create_session(&self) -> Result<SessionId, SignalingError> {
        self.count("create_session");
        self.inner.create_session().await.map_err(Into::into)
    }

    async fn close_session(&self, id: &SessionId) -> Result<(), SignalingError> {
        self.count("close_session");
        SignalingApi::close_session(&self.inner, id).await
    }

    async fn publish_offer(
        &self,
        id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        self.count("publish_offer");
        SignalingApi::publish_offer(&self.inner, id, offer).await
    }

    async fn fetch_offer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        self.count("fetch_offer");
        SignalingApi::fetch_offer(&self.inner, id).await
    }

    async fn publish_answer(
        &self,
        id: &SessionId,
        answer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        self.count("publish_answer");
        SignalingApi::publish_answer(&self.inner, id, answer).await
    }

    async fn fetch_answer(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        self.count("fetch_answer");
        SignalingApi::fetch_answer(&self.inner, id).await
    }

    async fn publish_candidate(
        &self,
        id: &SessionId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        self.count("publish_candidate");
        SignalingApi::publish_candidate(&self.inner, id, role, candidate).await
    }

    async fn fetch_candidates(
        &self,
        id: &SessionId,
        role: Role,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        self.count("fetch_candidates");
        let failing = self.failing_candidate_fetches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_candidate_fetches
                .store(failing - 1, Ordering::SeqCst);
            return Err(SignalingError::Upstream("flaky store".into()));
        }
        SignalingApi::fetch_candidates(&self.inner, id, role).await
    }
}

/// Relay whose calls never complete, like a request lost on the network
pub struct StalledSignaling {
    calls: AtomicUsize,
}

impl StalledSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn hang<T>(&self) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[async_trait]
impl SignalingApi for StalledSignaling {
    async fn create_session(&self) -> Result<SessionId, SignalingError> {
        self.hang().await
    }

    async fn close_session(&self, _id: &SessionId) -> Result<(), SignalingError> {
        self.hang().await
    }

    async fn publish_offer(
        &self,
        _id: &SessionId,
        _offer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        self.hang().await
    }

    async fn fetch_offer(
        &self,
        _id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        self.hang().await
    }

    async fn publish_answer(
        &self,
        _id: &SessionId,
        _answer: &SessionDescription,
    ) -> Result<(), SignalingError> {
        self.hang().await
    }

    async fn fetch_answer(
        &self,
        _id: &SessionId,
    ) -> Result<Option<SessionDescription>, SignalingError> {
        self.hang().await
    }

    async fn publish_candidate(
        &self,
        _id: &SessionId,
        _role: Role,
        _candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        self.hang().await
    }

    async fn fetch_candidates(
        &self,
        _id: &SessionId,
        _role: Role,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        self.hang().await
    }
}

pub fn spawn(
    role: Role,
    id: &SessionId,
    signaling: Arc<dyn SignalingApi>,
    net: &Arc<MockNetwork>,
) -> Handshake {
    Handshake::spawn(
        role,
        id.clone(),
        signaling,
        net.connector(),
        HandshakeConfig::default(),
    )
}

/// Waits (in paused test time) until the handshake reaches `state`
pub async fn wait_for_state(handshake: &Handshake, state: ConnectionState) {
    let mut rx = handshake.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, at {}", handshake.state()))
        .unwrap_or_else(|_| panic!("driver exited before {state}"));
}

/// Polls `cond` every 10ms of test time
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..6000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
