use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use crate::config::DEFAULT_LOG_FILTER;
use crate::session::IceCandidate;

/// Installs the global subscriber; `RUST_LOG` overrides the build default
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Trickle-ICE candidate as it appears
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index, init.username_fragment
        );
    }
}

/// Quick getStats snapshot of the nominated pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for report in stats.reports.into_values() {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                debug!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CandidateCounts {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateCounts {
    let mut counts = CandidateCounts::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            counts.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            counts.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            counts.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        counts.host, counts.srflx, counts.relay
    );
    if counts.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    counts
}
