//! nsmeta Metadata Server
//!
//! Boots a primary or standby metadata node on top of the local journal
//! and backing store, and keeps it running until interrupted.

use anyhow::Result;
use clap::Parser;
use nsmeta_common::{Config, ServerRole};
use nsmeta_replication::MetadataServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nsmeta-server")]
#[command(about = "nsmeta Metadata Server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/nsmeta/server.toml")]
    config: PathBuf,

    /// Node name used in logs
    #[arg(long)]
    name: Option<String>,

    /// Directory holding the journal file
    #[arg(long)]
    journal_dir: Option<PathBuf>,

    /// Backing store database file
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Journal ring capacity in bytes
    #[arg(long)]
    journal_max_size: Option<u64>,

    /// Start as a standby instead of a primary
    #[arg(long)]
    standby: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

/// File, then `NSMETA__*` environment, then command line
fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = config::Config::builder()
        .add_source(
            config::File::from(args.config.as_path())
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(config::Environment::with_prefix("NSMETA").separator("__"))
        .build()?
        .try_deserialize()?;
    apply_overrides(args, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(args: &Args, config: &mut Config) {
    if let Some(name) = &args.name {
        config.node.name.clone_from(name);
    }
    if let Some(dir) = &args.journal_dir {
        config.journal.dir.clone_from(dir);
    }
    if let Some(path) = &args.db_path {
        config.store.path.clone_from(path);
    }
    if let Some(size) = args.journal_max_size {
        config.journal.max_size = size;
    }
    if args.standby {
        config.replication.role = ServerRole::Standby;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_json)?;

    let config = load_config(&args)?;
    info!(
        "Starting nsmeta metadata server: journal={} store={}",
        config.journal.dir.display(),
        config.store.path.display()
    );

    let server = Arc::new(tokio::task::spawn_blocking(move || MetadataServer::boot(config)).await??);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                if !server.pipeline().is_running() {
                    error!("Journal pipeline is no longer running");
                    break;
                }
                debug!("role={} seqnum={}", server.role(), server.current_seqnum());
            }
        }
    }

    tokio::task::spawn_blocking(move || server.shutdown()).await??;
    info!("Metadata server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "nsmeta-server",
            "--journal-dir",
            "/var/lib/nsmeta/journal",
            "--journal-max-size",
            "1048576",
            "--standby",
        ])
        .unwrap();
        let mut config = Config::default();
        apply_overrides(&args, &mut config);
        assert_eq!(config.journal.dir, PathBuf::from("/var/lib/nsmeta/journal"));
        assert_eq!(config.journal.max_size, 1_048_576);
        assert_eq!(config.replication.role, ServerRole::Standby);
        assert_eq!(config.store.path, Config::default().store.path);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let args = Args::try_parse_from([
            "nsmeta-server",
            "--config",
            "/nonexistent/nsmeta.toml",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.replication.role, ServerRole::Primary);
        assert_eq!(config.replication.fetch_batch_bytes, 8000);
    }
}
