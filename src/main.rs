use anyhow::Result;
use clap::{Parser, Subcommand};

use swipe_signal::commands::{ice, peer, serve, session};
use swipe_signal::logger;

/// Signaling relay and headless peer for two-party swipe sessions
#[derive(Parser)]
#[command(name = "swipe-signal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP signaling relay
    Serve(serve::ServeArgs),

    /// Create a session on a relay and print its code
    Session(session::SessionArgs),

    /// Connect to the other peer of a session and swipe from stdin
    Peer(peer::PeerArgs),

    /// Check that a STUN/TURN server yields the expected candidates
    IceCheck(ice::IceCheckArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init();

    match cli.command {
        Commands::Serve(args) => serve::execute(args).await,
        Commands::Session(args) => session::execute(args).await,
        Commands::Peer(args) => peer::execute(args).await,
        Commands::IceCheck(args) => ice::execute(args).await,
    }
}
