//! Devchat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: port 2222, host key ./id_ed25519, bans ./bans.json
//! devchat
//!
//! # Settings from a file, port overridden on the command line
//! devchat --config devchat.toml --port 2022
//! ```
//!
//! The first interrupt or `SIGTERM` shuts the room down gracefully; a second
//! one exits immediately.

use std::path::PathBuf;

use clap::Parser;
use devchat_server::{ServerConfig, ServerError, Signals};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Multi-user chat room over SSH
#[derive(Parser, Debug)]
#[command(name = "devchat")]
#[command(about = "Chat room served over SSH")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of messages kept in the shared backlog
    #[arg(long)]
    scrollback: Option<usize>,

    /// Path to the JSON ban list
    #[arg(long)]
    bans: Option<PathBuf>,

    /// Path to the OpenSSH private host key
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// File settings (or defaults) with command-line overrides applied.
    fn server_config(&self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(scrollback) = self.scrollback {
            config.scrollback = scrollback;
        }
        if let Some(bans) = &self.bans {
            config.ban_filename.clone_from(bans);
        }
        if let Some(host_key) = &self.host_key {
            config.key_filename.clone_from(host_key);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.server_config()?;
    let mut signals = Signals::install()?;

    tracing::info!(
        bind = %config.bind_address(),
        scrollback = config.scrollback,
        bans = %config.ban_filename.display(),
        "devchat starting"
    );

    let running = devchat_server::start(&config).await?;
    tracing::info!("listening on {}", running.local_addr);

    signals.recv().await?;
    tracing::info!("shutting down");

    tokio::spawn(async move {
        if signals.recv().await.is_ok() {
            tracing::warn!("second signal, exiting without waiting");
            std::process::exit(1);
        }
    });

    running.handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn defaults_without_flags() {
        let args = Args::try_parse_from(["devchat"]).unwrap();
        assert_eq!(args.server_config().unwrap(), ServerConfig::default());
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devchat.toml");
        fs::write(&path, "port = 4000\nscrollback = 40\nkey_filename = \"file_key\"\n").unwrap();

        let args = Args::try_parse_from([
            "devchat",
            "-c",
            path.to_str().unwrap(),
            "--port",
            "2022",
            "--bans",
            "/tmp/bans.json",
        ])
        .unwrap();
        let config = args.server_config().unwrap();

        assert_eq!(config.port, 2022);
        assert_eq!(config.scrollback, 40);
        assert_eq!(config.ban_filename, PathBuf::from("/tmp/bans.json"));
        assert_eq!(config.key_filename, PathBuf::from("file_key"));
    }

    #[test]
    fn bad_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devchat.toml");
        fs::write(&path, "port = \"not a number\"\n").unwrap();

        let args = Args::try_parse_from(["devchat", "--config", path.to_str().unwrap()]).unwrap();
        assert!(matches!(args.server_config(), Err(ServerError::Config(_))));
    }
}
