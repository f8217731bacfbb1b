//! Tagcache maintenance daemon.
//!
//! Builds the cache from `TAGCACHE_*` variables and sweeps expired entries on
//! a fixed period until stopped. One-shot modes:
//!
//! - `--health-check`: exit 0 if the backend answers, 1 otherwise
//! - `--sweep-once`: purge expired entries and exit
//! - `--flush`: remove every entry and exit

use mimalloc::MiMalloc;
use tokio::signal;

use tagcache::backend::CleanMode;
use tagcache::cache::CacheService;
use tagcache::config::Config;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

enum Mode {
    Daemon,
    HealthCheck,
    SweepOnce,
    Flush,
}

impl Mode {
    fn from_args() -> anyhow::Result<Self> {
        let mut mode = Mode::Daemon;
        for arg in std::env::args().skip(1) {
            mode = match arg.as_str() {
                "--health-check" => Mode::HealthCheck,
                "--sweep-once" => Mode::SweepOnce,
                "--flush" => Mode::Flush,
                other => anyhow::bail!("unknown argument '{other}'"),
            };
        }
        Ok(mode)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mode = Mode::from_args()?;
    let config = Config::from_env()?;

    tracing::info!(
        backend = %config.backend,
        enabled = config.enabled,
        prefix = %config.key_prefix,
        "Tagcache starting"
    );

    let cache = match CacheService::from_config(&config).await {
        Ok(cache) => cache,
        Err(e) if matches!(mode, Mode::HealthCheck) => {
            tracing::error!(error = %e, "Health check failed");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    match mode {
        Mode::HealthCheck => {
            let healthy = !cache.is_enabled() || cache.ping().await;
            std::process::exit(if healthy { 0 } else { 1 });
        }
        Mode::SweepOnce => {
            if !cache.sweep().await {
                anyhow::bail!("sweep failed on {} backend", cache.backend_name());
            }
        }
        Mode::Flush => {
            if !cache.clean(CleanMode::All).await {
                anyhow::bail!("flush failed on {} backend", cache.backend_name());
            }
            tracing::info!(backend = cache.backend_name(), "Cache flushed");
        }
        Mode::Daemon => {
            let janitor = match config.janitor_interval() {
                Some(period) if cache.is_enabled() => Some(cache.spawn_janitor(period)),
                _ => {
                    tracing::warn!("Janitor disabled; waiting for shutdown signal");
                    None
                }
            };

            shutdown_signal().await;

            if let Some(janitor) = janitor {
                janitor.shutdown().await;
            }
            tracing::info!(stats = ?cache.stats(), "Tagcache shutdown complete");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping janitor");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping janitor");
        }
    }
}
