use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::peer::ice::check_ice_server;
use crate::peer::types::ServerConfig;

#[derive(Args, Debug)]
pub struct IceCheckArgs {
    /// Server URL, the `stun:`/`turn:` scheme may be omitted
    pub url: String,

    /// `stun` or `turn`
    #[arg(long = "type", default_value = "stun")]
    pub kind: String,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub credential: Option<String>,

    /// Seconds to wait for a matching candidate
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

pub async fn execute(args: IceCheckArgs) -> Result<()> {
    let config = ServerConfig {
        id: "cli".into(),
        r#type: args.kind,
        url: args.url,
        username: args.username,
        credential: args.credential,
    };

    let available = check_ice_server(&config, Duration::from_secs(args.timeout_secs)).await?;
    if available {
        println!("{} is reachable", config.url);
        Ok(())
    } else {
        anyhow::bail!("{} produced no {} candidate", config.url, config.r#type)
    }
}
