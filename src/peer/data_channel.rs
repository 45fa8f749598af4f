use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use webrtc::data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel};

use crate::peer::types::TransportEvent;

/// Shared data-channel wiring for both roles: lifecycle and inbound text
/// are forwarded to the handshake driver as [`TransportEvent`]s
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: UnboundedSender<TransportEvent>) {
    info!("Attaching data channel '{}'", dc.label());

    dc.on_open(Box::new({
        let events = events.clone();
        let label = dc.label().to_string();
        move || {
            info!("Data channel '{label}' opened");
            let _ = events.send(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg: DataChannelMessage| {
            debug!("Received message, length: {}", msg.data.len());
            if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Err(e) => warn!("Ignoring non UTF-8 text frame: {e}"),
                }
            } else {
                warn!("Ignoring binary data-channel frame");
            }
            Box::pin(async {})
        }
    }));

    dc.on_error(Box::new({
        let events = events.clone();
        move |err: webrtc::Error| {
            warn!("Data channel error: {err}");
            let _ = events.send(TransportEvent::ChannelError(err.to_string()));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new(move || {
        info!("Data channel closed");
        let _ = events.send(TransportEvent::ChannelClosed);
        Box::pin(async {})
    }));
}
