//! Gateway process entry point (spec C9 lifecycle): loads configuration, initializes
//! logging, then runs the HTTP/WebSocket server until a shutdown signal arrives.

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "agentbridge")]
#[command(about = "OpenAI-compatible routing gateway for a fleet of local inference agents")]
struct Args {
    /// Override AGENTBRIDGE_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override AGENTBRIDGE_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Override AGENTBRIDGE_DATABASE_PATH
    #[arg(long, value_name = "PATH")]
    database_path: Option<std::path::PathBuf>,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    tracing_subscriber::registry().with(fmt_layer).with(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    agentbridge_config::load_and_apply("agentbridge", None)?;
    init_logging();

    let mut config = agentbridge_config::Config::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database_path) = args.database_path {
        config.database_path = database_path;
    }

    agentbridge_serve::run_gateway(config).await
}
