//! Remora headless viewer: entry point.
//!
//! ```text
//! remora-client                    Connect with defaults
//! remora-client --config <path>    Use custom config TOML
//! remora-client --host <addr>      Host signaling address (overrides config)
//! remora-client --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remora_core::client::{Client, ScreenBuffer};
use remora_core::error::ErrorCode;
use remora_core::protocol::{NoRelay, SessionManager, SessionManagerConfig};
use remora_core::signal::TcpSignalLink;

use remora_client::config::ViewerConfig;
use remora_client::output::{ConsoleUi, dump_frame, report_stats};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "remora-client", about = "Remora headless remote desktop viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "remora-client.toml")]
    config: PathBuf,

    /// Host signaling address (overrides config). Example: 192.168.1.100:7340
    #[arg(long)]
    host: Option<String>,

    /// Shared secret (overrides config).
    #[arg(long)]
    secret: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(addr) = cli.host {
        config.network.host_address = addr;
    }
    if let Some(secret) = cli.secret {
        config.auth.secret = secret;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("remora-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Signaling link ───────────────────────────────────────

    let stream = tokio::time::timeout(
        config.connect_timeout(),
        TcpStream::connect(&config.network.host_address),
    )
    .await
    .map_err(|_| format!("timed out connecting to {}", config.network.host_address))??;
    stream.set_nodelay(true).ok();
    info!("signaling connected to {}", config.network.host_address);

    let (link, incoming) = TcpSignalLink::new(stream, config.network.local_jid.clone());
    let manager = SessionManager::start(
        Arc::new(link),
        incoming,
        SessionManagerConfig::default(),
        Arc::new(NoRelay),
        None,
    );

    // ── 2. Session ──────────────────────────────────────────────

    let screen = ScreenBuffer::new();
    let client = Client::connect(
        &manager,
        config.to_client_config(),
        Arc::new(ConsoleUi),
        Box::new(screen.clone()),
    )
    .await?;

    // ── 3. Run until closed, stopped or out of time ────────────

    let outcome = {
        let closed = client.closed();
        tokio::pin!(closed);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let run_for = config.run_for();
        let deadline = async {
            match run_for {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let stats_interval = config.stats_interval();
        let mut ticker = tokio::time::interval(stats_interval.unwrap_or(std::time::Duration::from_secs(3600)));
        ticker.tick().await;

        loop {
            tokio::select! {
                code = &mut closed => break Some(code),
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, disconnecting");
                    break None;
                }
                _ = &mut deadline => {
                    info!("run time elapsed, disconnecting");
                    break None;
                }
                _ = ticker.tick(), if stats_interval.is_some() => {
                    report_stats(&client.stats(), config.output.json_stats);
                }
            }
        }
    };

    let stats = client.stats();
    let code = match outcome {
        Some(code) => code,
        None => client.disconnect().await,
    };

    // ── 4. Shutdown ─────────────────────────────────────────────

    report_stats(&stats, config.output.json_stats);
    if let Some(path) = config.dump_path() {
        match screen.snapshot() {
            Some(frame) => {
                dump_frame(&frame, &path)?;
                info!("last frame written to {}", path.display());
            }
            None => warn!("no frame received; nothing to write"),
        }
    }
    manager.shutdown().await;

    if code != ErrorCode::Ok {
        return Err(format!("connection ended: {code}").into());
    }
    Ok(())
}
