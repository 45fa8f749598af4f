use anyhow::{Context, Result};
use clap::Args;

use crate::config::RELAY_REQUEST_TIMEOUT;
use crate::signaling::{HttpSignaling, SignalingApi};

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Relay base URL
    #[arg(long, env = "SIGNAL_RELAY_URL", default_value = "http://127.0.0.1:3000")]
    pub relay: String,
}

pub async fn execute(args: SessionArgs) -> Result<()> {
    let signaling = HttpSignaling::new(&args.relay, RELAY_REQUEST_TIMEOUT)?;
    let id = signaling
        .create_session()
        .await
        .with_context(|| format!("failed to create session on {}", args.relay))?;

    println!("{id}");
    Ok(())
}
