use clap::{Parser, Subcommand};
use raftkv_client::Client;

/// Command line client for the replicated key-value store.
#[derive(Parser)]
#[command(name = "raftkv-client")]
struct Args {
    /// A cluster member, host:port; repeat for every member
    #[arg(long = "node", required = true)]
    nodes: Vec<String>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the whole key-value state
    Get,
    /// Replicate an assignment
    Set { key: String, value: String },
    /// Replicate removal of a key
    Delete { key: String },
}

#[tokio::main]
pub async fn main() -> raftkv_client::Result<()> {
    tracing_subscriber::fmt::try_init()?;

    let args = Args::parse();
    let mut client = Client::new(args.nodes);
    match args.command {
        Cmd::Get => {
            let mut state: Vec<(String, String)> = client.get().await?.into_iter().collect();
            state.sort();
            for (key, value) in state {
                println!("{} = {}", key, value);
            }
        }
        Cmd::Set { key, value } => client.set(&key, &value).await?,
        Cmd::Delete { key } => client.delete(&key).await?,
    }
    Ok(())
}
