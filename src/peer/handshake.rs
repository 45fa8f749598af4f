//! Handshake driver.
//!
//! One task per attempt owns the [`Attempt`], the transport and every poll
//! timer, and serialises all work through a single `select!` loop: handle
//! commands, transport events and timer ticks never run concurrently.
//! Leaving the loop (disconnect, failure, handle dropped) always goes
//! through `teardown`, which cancels all timers and closes the transport.
//!
//! Relay calls are raced against the handle's stop signal, so a relay that
//! never answers cannot hold off a disconnect or a dropped handle.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::config::HandshakeConfig;
use crate::logger::analyze_candidates;
use crate::peer::state::{Attempt, CandidateAction};
use crate::peer::transport::{Connector, PeerTransport};
use crate::peer::types::{
    ConnectionState, HandshakeError, HandshakeEvent, SwipeMessage, TransportEvent,
};
use crate::session::{IceCandidate, Role, SessionDescription, SessionId};
use crate::signaling::SignalingApi;

enum Command {
    Start,
    Send(String),
    Disconnect,
    Subscribe(mpsc::UnboundedSender<HandshakeEvent>),
}

/// Handle to one handshake attempt. Dropping it tears the attempt down.
pub struct Handshake {
    role: Role,
    session_id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    // set on disconnect; dropping the handle drops the sender
    stop: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    last_error: watch::Receiver<Option<HandshakeError>>,
}

impl Handshake {
    pub fn spawn(
        role: Role,
        session_id: SessionId,
        signaling: Arc<dyn SignalingApi>,
        connector: Arc<dyn Connector>,
        config: HandshakeConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (error_tx, error_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);

        let driver = Driver {
            role,
            session_id: session_id.clone(),
            signaling,
            connector,
            config,
            attempt: Attempt::new(role),
            transport: None,
            events_tx,
            subscribers: Vec::new(),
            state_tx,
            error_tx,
            stop: stop_rx,
            local_candidates: Vec::new(),
            offer_poll: None,
            answer_poll: None,
            candidate_poll: None,
            flush_retry: None,
        };
        tokio::spawn(driver.run(commands_rx, events_rx));

        Self {
            role,
            session_id,
            commands: commands_tx,
            stop: stop_tx,
            state: state_rx,
            last_error: error_rx,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn command(&self, cmd: Command) -> Result<(), HandshakeError> {
        self.commands.send(cmd).map_err(|_| HandshakeError::Closed)
    }

    /// `idle -> connecting`; the initiator publishes its offer, the
    /// responder starts probing for one
    pub fn start(&self) -> Result<(), HandshakeError> {
        self.command(Command::Start)
    }

    /// Queues `msg` until the channel is open, sends immediately after
    pub fn send(&self, msg: &SwipeMessage) -> Result<(), HandshakeError> {
        if matches!(self.state(), ConnectionState::Closed | ConnectionState::Failed) {
            return Err(HandshakeError::Closed);
        }
        let payload =
            serde_json::to_string(msg).map_err(|e| HandshakeError::Channel(e.to_string()))?;
        self.command(Command::Send(payload))
    }

    pub fn disconnect(&self) -> Result<(), HandshakeError> {
        self.stop.send_replace(true);
        self.command(Command::Disconnect)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn last_error(&self) -> Option<HandshakeError> {
        self.last_error.borrow().clone()
    }

    /// Events raised after this call; the stream ends when the attempt does
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HandshakeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        // a closed driver drops `tx`, which ends the stream right away
        let _ = self.commands.send(Command::Subscribe(tx));
        rx
    }
}

struct Driver {
    role: Role,
    session_id: SessionId,
    signaling: Arc<dyn SignalingApi>,
    connector: Arc<dyn Connector>,
    config: HandshakeConfig,
    attempt: Attempt,
    transport: Option<Box<dyn PeerTransport>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    subscribers: Vec<mpsc::UnboundedSender<HandshakeEvent>>,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<HandshakeError>>,
    stop: watch::Receiver<bool>,
    local_candidates: Vec<IceCandidate>,
    offer_poll: Option<Interval>,
    answer_poll: Option<Interval>,
    candidate_poll: Option<Interval>,
    flush_retry: Option<Pin<Box<Sleep>>>,
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

fn poller(period: std::time::Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl Driver {
    /// `None` once the handle asked to stop; the pending call is dropped
    async fn relay<T>(&self, call: impl Future<Output = T>) -> Option<T> {
        let mut stop = self.stop.clone();
        tokio::select! {
            out = call => Some(out),
            _ = stop.wait_for(|stopped| *stopped) => {
                debug!("Relay call abandoned, handshake stopping");
                None
            }
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        debug!(
            "Handshake driver started: session {} role {}",
            self.session_id, self.role
        );

        while !self.is_terminal() {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        debug!("Handshake handle dropped, tearing down");
                        self.close().await;
                    }
                },
                Some(event) = events.recv() => self.on_transport_event(event).await,
                _ = tick(&mut self.offer_poll) => self.poll_offer().await,
                _ = tick(&mut self.answer_poll) => self.poll_answer().await,
                _ = tick(&mut self.candidate_poll) => self.poll_candidates().await,
                _ = elapsed(&mut self.flush_retry) => {
                    self.flush_retry = None;
                    self.flush(false).await;
                }
            }
        }

        debug!(
            "Handshake driver finished: session {} role {} state {}",
            self.session_id,
            self.role,
            self.attempt.state()
        );
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.attempt.state(),
            ConnectionState::Closed | ConnectionState::Failed
        )
    }

    fn emit(&mut self, event: HandshakeEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn publish_state(&mut self) {
        let state = self.attempt.state();
        self.state_tx.send_replace(state);
        info!("Handshake {} ({}) -> {}", self.session_id, self.role, state);
        self.emit(HandshakeEvent::StateChanged(state));
    }

    /// Non-fatal: recorded and reported, the attempt carries on
    fn report(&mut self, err: HandshakeError) {
        warn!("Handshake {} ({}): {err}", self.session_id, self.role);
        self.error_tx.send_replace(Some(err.clone()));
        self.emit(HandshakeEvent::Error(err));
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => self.start().await,
            Command::Send(payload) => {
                self.attempt.enqueue(payload);
                if self.attempt.is_channel_ready() && self.flush_retry.is_none() {
                    self.flush(true).await;
                } else {
                    debug!("Queued outbound message ({} pending)", self.attempt.queued());
                }
            }
            Command::Disconnect => self.close().await,
            Command::Subscribe(tx) => self.subscribers.push(tx),
        }
    }

    async fn start(&mut self) {
        if let Err(e) = self.attempt.begin() {
            warn!("Ignoring start: {e}");
            return;
        }
        self.publish_state();

        let transport = match self.connector.connect(self.role, self.events_tx.clone()).await {
            Ok(t) => t,
            Err(e) => {
                self.fail(HandshakeError::Construction(e.to_string())).await;
                return;
            }
        };
        self.transport = Some(transport);

        match self.role {
            Role::A => self.publish_offer().await,
            Role::B => {
                info!("Waiting for offer on session {}", self.session_id);
                self.offer_poll = Some(poller(self.config.offer_retry_interval));
            }
        }
    }

    async fn publish_offer(&mut self) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail(HandshakeError::Construction(e.to_string())).await;
                return;
            }
        };
        self.attempt.set_local_description();

        let Some(published) = self
            .relay(self.signaling.publish_offer(&self.session_id, &offer))
            .await
        else {
            return;
        };
        if let Err(e) = published {
            self.fail(HandshakeError::Exchange(e.to_string())).await;
            return;
        }
        info!("Offer published on session {}", self.session_id);

        self.answer_poll = Some(poller(self.config.poll_interval));
        self.candidate_poll = Some(poller(self.config.poll_interval));
    }

    async fn poll_offer(&mut self) {
        let Some(fetched) = self.relay(self.signaling.fetch_offer(&self.session_id)).await else {
            return;
        };
        let offer = match fetched {
            Ok(Some(offer)) => offer,
            Ok(None) => {
                debug!("No offer yet on session {}", self.session_id);
                return;
            }
            Err(e) => {
                self.report(HandshakeError::Exchange(e.to_string()));
                return;
            }
        };
        self.offer_poll = None;
        info!("Offer received on session {}", self.session_id);

        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let answer = match transport.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail(HandshakeError::Exchange(e.to_string())).await;
                return;
            }
        };
        self.attempt.set_local_description();
        self.remote_description_applied().await;

        let Some(published) = self
            .relay(self.signaling.publish_answer(&self.session_id, &answer))
            .await
        else {
            return;
        };
        if let Err(e) = published {
            self.fail(HandshakeError::Exchange(e.to_string())).await;
            return;
        }
        info!("Answer published on session {}", self.session_id);

        self.candidate_poll = Some(poller(self.config.poll_interval));
    }

    async fn poll_answer(&mut self) {
        let Some(fetched) = self.relay(self.signaling.fetch_answer(&self.session_id)).await else {
            return;
        };
        let answer = match fetched {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                debug!("No answer yet on session {}", self.session_id);
                return;
            }
            Err(e) => {
                self.report(HandshakeError::Exchange(e.to_string()));
                return;
            }
        };
        self.answer_poll = None;
        info!("Answer received on session {}", self.session_id);

        if let Err(e) = self.apply_answer(answer).await {
            self.fail(e).await;
            return;
        }
        self.remote_description_applied().await;
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), HandshakeError> {
        match self.transport.as_ref() {
            Some(transport) => transport
                .apply_answer(answer)
                .await
                .map_err(|e| HandshakeError::Exchange(e.to_string())),
            None => Ok(()),
        }
    }

    /// Applies the candidates that arrived before the remote description
    async fn remote_description_applied(&mut self) {
        let deferred = self.attempt.set_remote_description();
        if !deferred.is_empty() {
            debug!("Applying {} deferred remote candidates", deferred.len());
        }
        for candidate in deferred {
            self.add_remote_candidate(candidate).await;
        }
    }

    async fn poll_candidates(&mut self) {
        let Some(fetched) = self
            .relay(self.signaling.fetch_candidates(&self.session_id, self.role))
            .await
        else {
            return;
        };
        let candidates = match fetched {
            Ok(candidates) => candidates,
            Err(e) => {
                self.report(HandshakeError::Exchange(e.to_string()));
                return;
            }
        };

        for candidate in candidates {
            match self.attempt.accept_remote_candidate(candidate) {
                CandidateAction::Apply(candidate) => self.add_remote_candidate(candidate).await,
                CandidateAction::Deferred => {
                    debug!("Remote description not set yet, holding candidate")
                }
                CandidateAction::Duplicate => {}
            }
        }
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        debug!("Adding remote candidate: {}", candidate.candidate);
        if let Err(e) = transport.add_candidate(candidate).await {
            warn!("Failed to add remote candidate: {e}");
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        if self.transport.is_none() {
            debug!("Transport event after teardown ignored: {event:?}");
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let published = self
                    .relay(
                        self.signaling
                            .publish_candidate(&self.session_id, self.role, &candidate),
                    )
                    .await;
                if let Some(Err(e)) = published {
                    self.report(HandshakeError::Exchange(e.to_string()));
                }
                self.local_candidates.push(candidate);
            }
            TransportEvent::ChannelOpen => {
                if let Err(e) = self.attempt.channel_opened() {
                    debug!("Ignoring channel open: {e}");
                    return;
                }
                self.candidate_poll = None;
                analyze_candidates(&self.local_candidates);
                self.publish_state();
                self.emit(HandshakeEvent::Connected);
                self.flush(true).await;
            }
            TransportEvent::ChannelClosed => {
                info!("Data channel closed on session {}", self.session_id);
                self.close().await;
            }
            TransportEvent::ChannelError(msg) => {
                let err = HandshakeError::Channel(msg);
                if self.attempt.state() == ConnectionState::Connecting {
                    self.fail(err).await;
                } else {
                    self.report(err);
                }
            }
            TransportEvent::Message(text) => match serde_json::from_str::<SwipeMessage>(&text) {
                Ok(msg) => {
                    debug!("Received {} message", msg.kind());
                    self.emit(HandshakeEvent::Message(msg));
                }
                Err(e) => warn!("Dropping undecodable message: {e}"),
            },
        }
    }

    /// Drains the queue in order. A failed send goes back to the front and
    /// stops the drain; `retry` arms the single deferred retry.
    async fn flush(&mut self, retry: bool) {
        if !self.attempt.is_channel_ready() {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        while let Some(payload) = self.attempt.next_outbound() {
            if let Err(e) = transport.send_text(&payload).await {
                warn!("Send failed, message requeued: {e}");
                self.attempt.requeue_front(payload);
                if retry {
                    self.flush_retry = Some(Box::pin(sleep(self.config.flush_retry_delay)));
                }
                return;
            }
        }
    }

    async fn teardown(&mut self) {
        self.offer_poll = None;
        self.answer_poll = None;
        self.candidate_poll = None;
        self.flush_retry = None;

        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        if self.attempt.queued() > 0 {
            debug!("Discarding {} unsent messages", self.attempt.queued());
        }
        self.attempt.clear();
    }

    async fn close(&mut self) {
        if self.attempt.close().is_err() {
            return;
        }
        self.teardown().await;
        self.publish_state();
        self.emit(HandshakeEvent::Disconnected);
    }

    async fn fail(&mut self, err: HandshakeError) {
        error!("Handshake {} ({}) failed: {err}", self.session_id, self.role);
        if self.attempt.fail().is_err() {
            return;
        }
        self.teardown().await;
        self.error_tx.send_replace(Some(err.clone()));
        self.emit(HandshakeEvent::Error(err));
        self.publish_state();
    }
}
