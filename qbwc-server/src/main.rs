//! QBWC connector — entry point.
//!
//! ```text
//! qbwc-server                      Run in the foreground
//! qbwc-server --config <path>      Load a custom config TOML
//! qbwc-server --gen-config         Write default config to stdout
//! qbwc-server --gen-config <path>  Write default config to <path>
//! qbwc-server --hash <text>        Print the credential hash of <text>
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qbwc_core::hash_credential;
use qbwc_server::config::ServerConfig;
use qbwc_server::service::ConnectorService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "qbwc-server", about = "QuickBooks Web Connector poll-protocol server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "qbwc-server.toml")]
    config: PathBuf,

    /// Write the default configuration to PATH (or stdout) and exit.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    gen_config: Option<Option<PathBuf>>,

    /// Print the credential hash of a username or password and exit.
    #[arg(long, value_name = "TEXT")]
    hash: Option<String>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.gen_config {
        Some(Some(path)) => {
            ServerConfig::write_default(&path)?;
            println!("Wrote default config to {}", path.display());
            return Ok(());
        }
        Some(None) => {
            let text = toml::to_string_pretty(&ServerConfig::default())?;
            println!("{text}");
            return Ok(());
        }
        None => {}
    }

    if let Some(text) = cli.hash {
        println!("{}", hash_credential(&text));
        return Ok(());
    }

    let (config, source) = ServerConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    info!("qbwc-server v{}", env!("CARGO_PKG_VERSION"));
    source.log(&cli.config);
    info!("listen address: {}", config.network.listen_addr);
    info!("endpoint: {}", config.network.endpoint_path);
    info!("catalog directory: {}", config.catalog.directory.display());
    if config.secret().is_none() {
        tracing::warn!("no auth secret configured; every login will be rejected");
    }

    let service = ConnectorService::from_config(config);
    info!("catalog entries: {}", service.engine().catalog().size());
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
