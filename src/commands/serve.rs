use anyhow::Result;
use clap::Args;

use crate::config::RelayConfig;
use crate::relay::server::start_server;

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub relay: RelayConfig,
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    start_server(args.relay).await
}
