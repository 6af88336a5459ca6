use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use duel_server::ServerConfig;
use duel_store::{Database, SqliteStorage, Storage};
use duel_telemetry::TelemetryConfig;

/// Real-time two-player battle server.
#[derive(Debug, Parser)]
#[command(name = "duel", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "DUEL_PORT", default_value_t = 3003)]
    port: u16,

    /// SQLite database path; `:memory:` keeps everything in memory.
    /// Defaults to `$HOME/.duel/duel.db`.
    #[arg(long, env = "DUEL_DB_PATH")]
    db_path: Option<String>,

    /// Default log level.
    #[arg(long, env = "DUEL_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Per-module level override, e.g. `duel_store=warn`. Repeatable.
    #[arg(long = "log-module", value_name = "MODULE=LEVEL")]
    log_modules: Vec<String>,

    /// Human-readable logs instead of JSON.
    #[arg(long, env = "DUEL_LOG_PRETTY")]
    log_pretty: bool,

    /// Seconds between pings. A client that misses three in a row is dropped.
    #[arg(
        long,
        env = "DUEL_PING_INTERVAL_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    ping_interval_secs: u64,

    /// How long a send to another player may wait for queue space.
    #[arg(long, env = "DUEL_SEND_TIMEOUT_SECS", default_value_t = 5)]
    send_timeout_secs: u64,

    /// HP removed by each attack.
    #[arg(
        long,
        env = "DUEL_BASE_DAMAGE",
        default_value_t = duel_engine::DEFAULT_BASE_DAMAGE,
        value_parser = clap::value_parser!(i64).range(0..)
    )]
    base_damage: i64,
}

impl Cli {
    fn telemetry(&self) -> anyhow::Result<TelemetryConfig> {
        let module_levels = self
            .log_modules
            .iter()
            .map(|raw| {
                let (module, level) = raw
                    .split_once('=')
                    .ok_or_else(|| anyhow!("expected MODULE=LEVEL, got {raw:?}"))?;
                let level = duel_telemetry::parse_level(level)
                    .ok_or_else(|| anyhow!("unknown log level {level:?}"))?;
                Ok((module.trim().to_string(), level))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(TelemetryConfig {
            log_level: self.log_level,
            module_levels,
            pretty: self.log_pretty,
        })
    }

    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let config = ServerConfig {
            port: self.port,
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            base_damage: self.base_damage,
            ..ServerConfig::default()
        }
        .with_ping_interval(Duration::from_secs(self.ping_interval_secs));
        config.validate()?;
        Ok(config)
    }

    fn database(&self) -> anyhow::Result<Database> {
        match self.db_path.as_deref() {
            Some(":memory:") => Ok(Database::in_memory()?),
            Some(path) => Database::open(&PathBuf::from(path)).with_context(|| format!("opening {path}")),
            None => {
                let path = dirs_home().join(".duel").join("duel.db");
                Database::open(&path).with_context(|| format!("opening {}", path.display()))
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    duel_telemetry::init_telemetry(&cli.telemetry()?);

    tracing::info!("Starting duel server");

    let db = cli.database()?;
    tracing::info!(path = %db.path().display(), "Database ready");
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new(db));

    let handle = duel_server::start(cli.server_config()?, storage)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "duel server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
