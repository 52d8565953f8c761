//! Remora host: entry point.
//!
//! ```text
//! remora-host                     Run in the foreground
//! remora-host --config <path>     Load a custom config TOML
//! remora-host --listen <addr>     Override the signaling listen address
//! remora-host --gen-config        Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use remora_host::config::HostFileConfig;
use remora_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "remora-host", about = "Remora remote desktop host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "remora-host.toml")]
    config: PathBuf,

    /// Signaling listen address (overrides config). Example: 0.0.0.0:7340
    #[arg(short, long)]
    listen: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostFileConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = HostFileConfig::load(&cli.config);
    if let Some(addr) = cli.listen {
        config.network.listen_address = addr;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("remora-host v{}", env!("CARGO_PKG_VERSION"));
    info!("jid: {}", config.network.local_jid);
    info!(
        "screen: {}x{} @ {} fps, codecs {:?}",
        config.screen.width, config.screen.height, config.screen.max_fps, config.screen.codecs
    );
    if config.auth.secret.is_empty() {
        tracing::warn!("no shared secret configured; any client can connect");
    }

    let service = HostService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
