use clap::Parser;
use raftkv_server::server::Server;

/// A node of the replicated key-value store.
#[derive(Parser)]
#[command(name = "raftkv-server")]
struct Args {
    /// The host:port this node binds and identifies itself as
    address: String,
    /// Every member of the cluster, this node included
    #[arg(required = true)]
    network: Vec<String>,
}

#[tokio::main]
pub async fn main() -> raftkv_core::Result<()> {
    tracing_subscriber::fmt::try_init()?;

    let args = Args::parse();
    let server = Server::new(&args.address, args.network);
    server.run(tokio::signal::ctrl_c()).await?;
    Ok(())
}
