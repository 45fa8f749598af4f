use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::HandshakeConfig;
use crate::peer::types::{ConnectionState, HandshakeEvent, Place, ServerConfig, SwipeValue};
use crate::peer::{Handshake, WebRtcConnector};
use crate::round::SwipeRound;
use crate::session::{Role, SessionId};
use crate::signaling::{HttpSignaling, SignalingApi};

#[derive(Args, Debug)]
pub struct PeerArgs {
    /// Relay base URL
    #[arg(long, env = "SIGNAL_RELAY_URL", default_value = "http://127.0.0.1:3000")]
    pub relay: String,

    /// `A` creates the session and offers, `B` answers
    #[arg(long)]
    pub role: Role,

    /// Session code; created on the relay when `A` omits it
    #[arg(long)]
    pub session: Option<String>,

    /// JSON array of places to share once connected (`A` only)
    #[arg(long)]
    pub places: Option<PathBuf>,

    /// Delete the session from the relay as soon as the channel opens
    #[arg(long)]
    pub close_on_connect: bool,

    /// STUN server, repeatable; replaces the default list
    #[arg(long = "stun")]
    pub stun: Vec<String>,

    /// TURN server
    #[arg(long, requires_all = ["turn_username", "turn_credential"])]
    pub turn: Option<String>,

    #[arg(long)]
    pub turn_username: Option<String>,

    #[arg(long)]
    pub turn_credential: Option<String>,
}

impl PeerArgs {
    fn handshake_config(&self) -> HandshakeConfig {
        let mut config = HandshakeConfig::default();

        let mut servers: Vec<ServerConfig> = self
            .stun
            .iter()
            .enumerate()
            .map(|(i, url)| ServerConfig::stun(&format!("cli-stun-{i}"), url))
            .collect();
        if let Some(url) = &self.turn {
            servers.push(ServerConfig {
                id: "cli-turn".into(),
                r#type: "turn".into(),
                url: url.clone(),
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }
        if !servers.is_empty() {
            config.ice_servers = servers;
        }
        config
    }
}

fn load_places(path: &Path) -> Result<Vec<Place>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read places file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid places file {}", path.display()))
}

fn parse_swipe(line: &str) -> Option<SwipeValue> {
    match line.trim().to_ascii_lowercase().as_str() {
        "l" | "like" | "y" => Some(SwipeValue::Like),
        "n" | "nope" => Some(SwipeValue::Nope),
        _ => None,
    }
}

pub async fn execute(args: PeerArgs) -> Result<()> {
    let config = args.handshake_config();
    let signaling: Arc<dyn SignalingApi> =
        Arc::new(HttpSignaling::new(&args.relay, config.request_timeout)?);

    let session_id = match (&args.session, args.role) {
        (Some(code), _) => SessionId::parse(code).context("invalid session code")?,
        (None, Role::A) => signaling
            .create_session()
            .await
            .context("failed to create session")?,
        (None, Role::B) => bail!("role B needs --session"),
    };
    println!("session {session_id} as {}", args.role);

    let places = match &args.places {
        Some(path) if args.role == Role::A => Some(load_places(path)?),
        Some(_) => {
            warn!("--places is ignored for role B");
            None
        }
        None => None,
    };

    let connector = Arc::new(WebRtcConnector::new(&config));
    let handshake = Handshake::spawn(
        args.role,
        session_id.clone(),
        signaling.clone(),
        connector,
        config,
    );
    let mut events = handshake.subscribe();
    handshake.start()?;

    let mut round = SwipeRound::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut finished = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    HandshakeEvent::Connected => {
                        println!("connected");
                        if args.close_on_connect {
                            if let Err(e) = signaling.close_session(&session_id).await {
                                warn!("Failed to close session {session_id}: {e}");
                            }
                        }
                        if let Some(places) = places.clone() {
                            handshake.send(&round.start(places)?)?;
                        }
                    }
                    HandshakeEvent::Message(msg) => {
                        info!("Partner sent {}", msg.kind());
                        round.receive(msg);
                        if let Some(place) = round.current() {
                            println!("next: {} ({:.1}) [l]ike / [n]ope", place.name, place.rating);
                        }
                    }
                    HandshakeEvent::Error(err) => eprintln!("error: {err}"),
                    HandshakeEvent::Disconnected => {
                        println!("disconnected");
                        break;
                    }
                    HandshakeEvent::StateChanged(ConnectionState::Failed) => {
                        bail!("handshake failed: {:?}", handshake.last_error());
                    }
                    HandshakeEvent::StateChanged(_) => {}
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => match parse_swipe(&line) {
                        Some(value) => match round.swipe(value) {
                            Ok(out) => {
                                for msg in &out {
                                    handshake.send(msg)?;
                                }
                                match round.current() {
                                    Some(place) => println!("next: {} ({:.1})", place.name, place.rating),
                                    None => println!("done, waiting for partner"),
                                }
                            }
                            Err(e) => eprintln!("{e}"),
                        },
                        None => eprintln!("type l or n"),
                    },
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if handshake.disconnect().is_err() {
                    break;
                }
            }
        }

        if finished {
            continue;
        }
        if let Some(matches) = round.matches() {
            finished = true;
            println!("matches:");
            for place in matches {
                println!("  {} - {}", place.name, place.address);
            }
            handshake.disconnect()?;
        }
    }

    Ok(())
}
