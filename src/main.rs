use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, info_span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use websocks_rs::config::{LocalFile, RemoteFile};
use websocks_rs::{LocalGateway, RemoteDispatcher};

#[derive(Parser, Debug)]
#[command(name = "websocks-rs")]
#[command(about = "SOCKS5 proxy tunneled over WebSocket", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the local SOCKS5 gateway
    #[command(alias = "c")]
    Client {
        /// Config file (TOML)
        #[arg(short, long, default_value = "client.toml")]
        config: PathBuf,

        /// Local SOCKS5 listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Tunnel URL (e.g., wss://example.com/websocks)
        #[arg(short, long)]
        server: Option<String>,

        /// Origin header for the WebSocket handshake
        #[arg(long)]
        origin: Option<String>,

        /// Extra CA certificate (PEM) to trust, for self-signed servers
        #[arg(long)]
        ca_cert: Option<PathBuf>,
    },

    /// Run the remote tunnel endpoint
    #[command(alias = "s")]
    Server {
        /// Config file (TOML)
        #[arg(short, long, default_value = "server.toml")]
        config: PathBuf,

        /// Tunnel listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// WebSocket path
        #[arg(short, long)]
        path: Option<String>,

        /// TLS certificate (PEM)
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// TLS private key (PEM)
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    let log_level = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("websocks_rs={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let serve = async {
        match args.command {
            Commands::Client {
                config,
                listen,
                server,
                origin,
                ca_cert,
            } => {
                let mut file = LocalFile::load(&config)
                    .with_context(|| format!("loading {}", config.display()))?;
                if let Some(listen) = listen {
                    file.listen_addr = listen;
                }
                if let Some(server) = server {
                    file.server_url = server;
                }
                if origin.is_some() {
                    file.origin = origin;
                }
                if ca_cert.is_some() {
                    file.ca_cert = ca_cert;
                }
                let config = file.validate()?;

                LocalGateway::bind(config)
                    .await?
                    .with_span(info_span!("client"))
                    .serve()
                    .await?;
            }

            Commands::Server {
                config,
                listen,
                path,
                cert,
                key,
            } => {
                let mut file = RemoteFile::load(&config)
                    .with_context(|| format!("loading {}", config.display()))?;
                if let Some(listen) = listen {
                    file.listen_addr = listen;
                }
                if let Some(path) = path {
                    file.path = path;
                }
                if cert.is_some() {
                    file.tls_cert = cert;
                    file.tls_key = key;
                }
                let config = file.validate()?;

                RemoteDispatcher::bind(config)
                    .await?
                    .with_span(info_span!("server"))
                    .serve()
                    .await?;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = serve => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    }
}
