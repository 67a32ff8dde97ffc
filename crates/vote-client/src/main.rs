use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vote_client::client::Gateway;
use vote_client::dispatch::{init_ledger, Dispatcher};
use vote_common::{Config, GatewayError};

// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional YAML file overriding the built-in network settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit InitLedger once to seed a freshly deployed contract
    InitLedger,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

// The gateway connection is dropped when this returns, whatever the outcome.
async fn run(args: Args) -> Result<(), GatewayError> {
    info!("============ vote client starts ============");
    let config = Config::load(args.config.as_deref())?;
    let gateway = Gateway::connect(&config).await?;
    let contract = gateway.contract(&config.channel_name, &config.chaincode_name);

    match args.command {
        Some(Command::InitLedger) => {
            let submitted = init_ledger(&contract, &mut std::io::stdout()).await?;
            info!(
                "InitLedger committed in block {} ({})",
                submitted.block_number, submitted.transaction_id
            );
            Ok(())
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            let mut dispatcher = Dispatcher::new(Arc::new(contract), stdin, std::io::stdout());
            dispatcher.run().await
        }
    }
}
