use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
    },
};

use crate::peer::types::{ServerConfig, TransportError};
use crate::session::{IceCandidate, SdpKind, SessionDescription};
use crate::utils::add_ice_url_scheme;

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

pub fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpKind::Rollback => {
            return Err(TransportError::Description(
                "rollback descriptions are not exchanged".into(),
            ))
        }
    };
    parsed.map_err(|e| TransportError::Description(e.to_string()))
}

pub fn from_rtc_description(desc: &RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::Description("unspecified sdp type".into()))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    })
}

/// Converts the configured servers, completing missing URL schemes
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn kind_matches(server_type: &str, candidate: &str) -> bool {
    match server_type {
        "stun" => candidate.contains("srflx"),
        "turn" => candidate.contains("relay"),
        _ => false,
    }
}

/// Gathers candidates through `config` alone and reports whether the
/// server produced the candidate type it is expected to (srflx for STUN,
/// relay for TURN) before gathering completes or `wait` elapses
pub async fn check_ice_server(config: &ServerConfig, wait: Duration) -> Result<bool, TransportError> {
    config
        .validate()
        .map_err(|e| TransportError::Setup(e.to_string()))?;

    let rtc_config = RTCConfiguration {
        ice_servers: ice_servers(std::slice::from_ref(config)),
        ..Default::default()
    };
    let api = APIBuilder::new().build();
    let pc = api
        .new_peer_connection(rtc_config)
        .await
        .map_err(|e| TransportError::Setup(e.to_string()))?;

    // Some(matched) per candidate, None once gathering is complete
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<bool>>();
    let server_type = config.r#type.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let server_type = server_type.clone();
        Box::pin(async move {
            let verdict = match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        debug!("Probe candidate: {}", init.candidate);
                        Some(kind_matches(&server_type, &init.candidate))
                    }
                    Err(e) => {
                        warn!("Failed to serialise probe candidate: {e}");
                        Some(false)
                    }
                },
                None => None,
            };
            let _ = tx.send(verdict);
        })
    }));

    let probe = async {
        pc.create_data_channel("probe", None).await?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await
    };
    if let Err(e) = probe.await {
        let _ = pc.close().await;
        return Err(TransportError::Setup(e.to_string()));
    }

    let outcome = timeout(wait, async {
        while let Some(verdict) = rx.recv().await {
            match verdict {
                Some(true) => return true,
                Some(false) => continue,
                None => return false,
            }
        }
        false
    })
    .await;

    if let Err(e) = pc.close().await {
        debug!("Probe connection close failed: {e}");
    }

    let available = outcome.unwrap_or(false);
    info!(
        "ICE server {} ({}) available: {available}",
        config.url, config.r#type
    );
    Ok(available)
}
