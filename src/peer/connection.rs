use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

use crate::config::HandshakeConfig;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::data_channel::attach_dc;
use crate::peer::ice::{from_rtc_description, ice_servers, to_rtc_description};
use crate::peer::transport::{Connector, PeerTransport};
use crate::peer::types::{ServerConfig, TransportError, TransportEvent};
use crate::session::{IceCandidate, Role, SessionDescription};

/// Builds `webrtc` crate peer connections. The initiator opens the data
/// channel, the responder waits for it.
pub struct WebRtcConnector {
    ice_servers: Vec<ServerConfig>,
    channel_label: String,
}

impl WebRtcConnector {
    pub fn new(config: &HandshakeConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            channel_label: config.channel_label.clone(),
        }
    }
}

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    channel: ChannelSlot,
}

fn setup_err(e: webrtc::Error) -> TransportError {
    TransportError::Setup(e.to_string())
}

fn description_err(e: webrtc::Error) -> TransportError {
    TransportError::Description(e.to_string())
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    async fn connect(
        &self,
        role: Role,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, TransportError> {
        for server in &self.ice_servers {
            server
                .validate()
                .map_err(|e| TransportError::Setup(e.to_string()))?;
        }

        let api = APIBuilder::new().build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&self.ice_servers))
                .await
                .map_err(setup_err)?,
        );

        pc.on_ice_candidate(Box::new({
            let events = events.clone();
            move |cand: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    match cand {
                        Some(c) => {
                            dump_candidate("LOCAL", &c);
                            match c.to_json() {
                                Ok(init) => {
                                    let _ = events.send(TransportEvent::LocalCandidate(
                                        IceCandidate::from(init),
                                    ));
                                }
                                Err(e) => warn!("Failed to serialise local candidate: {e}"),
                            }
                        }
                        None => debug!("ICE candidate gathering completed"),
                    }
                })
            }
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {state:?}");
            Box::pin(async {})
        }));

        let pc_stats = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new({
            let events = events.clone();
            move |st: RTCPeerConnectionState| {
                info!("Peer connection state changed to: {st:?}");
                let events = events.clone();
                let pc_stats = pc_stats.clone();
                Box::pin(async move {
                    match st {
                        RTCPeerConnectionState::Connected => {
                            if let Some(pc) = pc_stats.upgrade() {
                                dump_selected_pair(&pc, "CONNECTED").await;
                            }
                        }
                        RTCPeerConnectionState::Failed => {
                            let _ = events.send(TransportEvent::ChannelError(
                                "peer connection failed".into(),
                            ));
                        }
                        _ => {}
                    }
                })
            }
        }));

        let channel: ChannelSlot = Arc::new(Mutex::new(None));
        match role {
            Role::A => {
                let dc = pc
                    .create_data_channel(&self.channel_label, Some(channel_init()))
                    .await
                    .map_err(setup_err)?;
                attach_dc(&dc, events);
                *channel.lock().await = Some(dc);
            }
            Role::B => {
                let slot = channel.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    attach_dc(&dc, events.clone());
                    let slot = slot.clone();
                    Box::pin(async move {
                        *slot.lock().await = Some(dc);
                    })
                }));
            }
        }

        Ok(Box::new(WebRtcTransport { pc, channel }))
    }
}

/// Ordered and reliable: no retransmit or lifetime limit
fn channel_init() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(true),
        max_retransmits: None,
        max_packet_life_time: None,
        ..Default::default()
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(setup_err)?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(description_err)?;
        from_rtc_description(&offer)
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        self.pc
            .set_remote_description(to_rtc_description(offer)?)
            .await
            .map_err(description_err)?;

        let answer = self.pc.create_answer(None).await.map_err(description_err)?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(description_err)?;
        from_rtc_description(&answer)
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc_description(answer)?)
            .await
            .map_err(description_err)
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit::from(candidate))
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn send_text(&self, payload: &str) -> Result<(), TransportError> {
        let dc = self.channel.lock().await.clone();
        let Some(dc) = dc else {
            return Err(TransportError::NotReady);
        };
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(TransportError::NotReady);
        }
        dc.send_text(payload.to_string())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) {
        if let Some(dc) = self.channel.lock().await.take() {
            if let Err(e) = dc.close().await {
                debug!("Data channel close failed: {e}");
            }
        }
        if let Err(e) = self.pc.close().await {
            warn!("Peer connection close failed: {e}");
        }
    }
}
