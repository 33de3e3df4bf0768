mod config;

use callrelay_gateway::{AuthConfig, CallBridge, GatewayServer};
use callrelay_session::{CallerNumberPool, InMemorySessionRegistry};
use clap::{Parser, Subcommand};
use config::{RelayConfig, API_KEY_ENV};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "callrelay", about = "Bridge phone calls to a realtime voice model")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "callrelay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate the config file and print what it resolves to
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let mut config = RelayConfig::parse(&config_str)?;
    config.apply_env_credential(std::env::var(API_KEY_ENV).ok());

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let pool = Arc::new(CallerNumberPool::new(config.caller_numbers.iter().cloned()));
            if pool.capacity() == 0 {
                warn!("No caller numbers configured; every placement will be refused");
            }
            if config.realtime.api_key.is_none() {
                warn!("No default realtime credential; placements must carry their own");
            }

            let auth_config = AuthConfig::new(config.security.api_keys.clone());
            if auth_config.is_enabled() {
                info!(keys = config.security.api_keys.len(), "API key auth enabled");
            }

            let bridge = CallBridge::new(
                config.bridge_config(),
                Arc::new(InMemorySessionRegistry::new()),
                pool.clone(),
            );
            let app = GatewayServer::build_with_auth(bridge, auth_config);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(
                addr = %addr,
                caller_numbers = pool.capacity(),
                realtime = %config.realtime.url,
                "callrelay gateway listening"
            );
            axum::serve(listener, app).await?;
        }
        Commands::Check => {
            println!("Config: {}", cli.config.display());
            println!("  listen:          {}:{}", config.server.host, config.server.port);
            println!("  caller numbers:  {}", config.caller_numbers.len());
            println!("  api keys:        {}", config.security.api_keys.len());
            println!("  realtime url:    {}", config.realtime.url);
            println!(
                "  realtime key:    {}",
                if config.realtime.api_key.is_some() { "set" } else { "missing" }
            );
            println!(
                "  default webhook: {}",
                config.webhook.default_url.as_deref().unwrap_or("none")
            );
            match config.relay.idle_timeout() {
                Some(limit) => println!("  idle timeout:    {}s", limit.as_secs()),
                None => println!("  idle timeout:    off"),
            }
        }
    }

    Ok(())
}
