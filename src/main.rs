//! import-warden — main entry point.
//!
//! Wires the long-lived components together (cache, manager client,
//! reconciliation engine, delayed-task scheduler, webhook server), runs them
//! until a shutdown signal arrives, then drains in-flight work with a grace
//! period.
//!
//! Exit codes: 0 normal shutdown, 1 configuration error, 2 unrecoverable
//! auth failure against the manager, 3 runtime panic.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use import_warden::analyzer::{AnalyzerPolicy, TrackerLists};
use import_warden::cache::TtlCache;
use import_warden::config::{AppConfig, LogFormat};
use import_warden::engine::{EngineConfig, ReconcileEngine};
use import_warden::metrics::Metrics;
use import_warden::scheduler::DelayedScheduler;
use import_warden::server::{build_router, AppState, ServerConfig};
use import_warden::sonarr::{ClientConfig, SonarrClient, SonarrError};

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_AUTH_FAILURE: u8 = 2;
const EXIT_RUNTIME_PANIC: u8 = 3;

/// How long in-flight work gets to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Cadence for dropping idle addresses from the webhook rate limiter.
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Watches a Sonarr-compatible manager and reconciles import score
/// discrepancies.
#[derive(Debug, Parser)]
#[command(name = "import-warden", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single scan cycle and exit.
    #[arg(long)]
    once: bool,

    /// Log would-be actions without mutating the manager.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            // Logging is configured from the config itself, so config errors
            // go straight to stderr.
            eprintln!("configuration error: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if cli.dry_run {
        config.dry_run = true;
    }

    init_tracing(&config);

    if config.webhook_secret_generated {
        if let Some(secret) = &config.webhook.secret {
            info!(
                secret = %secret,
                "auto-generated webhook secret; configure the manager's webhook with it"
            );
        }
    }
    if config.dry_run {
        info!("dry-run mode: no mutating calls will be made");
    }

    // Long-lived shared components, constructed once and passed by reference.
    let cache = Arc::new(TtlCache::new(Duration::from_secs(300)));
    let metrics = Arc::new(Metrics::new());

    let mut client_config = ClientConfig::new(&config.sonarr.url, &config.sonarr.api_key);
    client_config.timeout = config.sonarr.timeout;
    let client = Arc::new(SonarrClient::new(
        client_config,
        Arc::clone(&cache),
        Arc::clone(&metrics),
    ));

    let engine = Arc::new(ReconcileEngine::new(
        Arc::clone(&client),
        Arc::clone(&cache),
        Arc::clone(&metrics),
        EngineConfig {
            interval: config.monitoring.interval,
            dry_run: config.dry_run,
            action_cooldown: Duration::from_secs(600),
            policy: AnalyzerPolicy {
                force_import_threshold: config.monitoring.force_import_threshold,
                remove_public_failures: config.monitoring.remove_public_failures,
                protect_unknown_trackers: config.monitoring.protect_unknown_trackers,
            },
            trackers: TrackerLists::new(
                config.trackers.private.clone(),
                config.trackers.public.clone(),
            ),
        },
    ));
    let scheduler = Arc::new(DelayedScheduler::new());

    // Connectivity probe: a bad API key is unrecoverable, so fail fast.
    match client.system_status().await {
        Ok(status) => info!(
            url = %config.sonarr.url,
            version = status.version.as_deref().unwrap_or("unknown"),
            "connected to manager"
        ),
        Err(SonarrError::Unauthorized) => {
            error!(url = %config.sonarr.url, "manager rejected the API key");
            return ExitCode::from(EXIT_AUTH_FAILURE);
        }
        Err(err) => {
            warn!(url = %config.sonarr.url, error = %err, "manager unreachable at startup, continuing");
        }
    }

    if cli.once {
        info!("running a single scan cycle");
        return match engine.scan().await {
            Ok(stats) => {
                info!(
                    candidates = stats.candidates,
                    processed = stats.processed,
                    deferred = stats.deferred,
                    "single cycle complete"
                );
                ExitCode::SUCCESS
            }
            Err(SonarrError::Unauthorized) => ExitCode::from(EXIT_AUTH_FAILURE),
            Err(err) => {
                error!(error = %err, "single cycle failed");
                ExitCode::SUCCESS
            }
        };
    }

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Periodic scanner.
    tasks.push(tokio::spawn({
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        async move { engine.run(shutdown).await }
    }));

    // Delayed-check scheduler.
    tasks.push(tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        async move {
            scheduler
                .run(shutdown, move |task| {
                    let engine = Arc::clone(&engine);
                    async move {
                        engine.post_grab_check(&task.fingerprint).await;
                    }
                })
                .await
        }
    }));

    // Webhook server.
    if config.webhook.enabled {
        let state = AppState::new(
            Arc::clone(&engine),
            Arc::clone(&scheduler),
            Arc::clone(&client),
            Arc::clone(&cache),
            Arc::clone(&metrics),
            ServerConfig {
                secret: config.webhook.secret.clone(),
                import_check_delay: config.webhook.import_check_delay,
                rate_limit_per_min: config.webhook.rate_limit_per_min,
            },
        );
        let router = build_router(state.clone());

        // Idle rate-limiter addresses decay on a fixed cadence, the same way
        // the engine sweeps the cache and its own lock/cool-down maps.
        tasks.push(tokio::spawn({
            let state = state.clone();
            let shutdown = shutdown.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(RATE_LIMIT_PRUNE_INTERVAL) => {
                            state.rate_limiter().prune();
                        }
                    }
                }
            }
        }));

        let bind = format!("{}:{}", config.webhook.host, config.webhook.port);
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(bind = %bind, error = %err, "cannot bind webhook listener");
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        };
        info!(bind = %bind, "webhook server listening on /webhook/sonarr");

        tasks.push(tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let result = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
                if let Err(err) = result {
                    error!(error = %err, "webhook server stopped unexpectedly");
                }
            }
        }));
    } else {
        warn!("webhook server disabled; running on polling alone");
    }

    info!(
        interval_s = config.monitoring.interval.as_secs(),
        threshold = config.monitoring.force_import_threshold,
        dry_run = config.dry_run,
        "import-warden started"
    );

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    let mut exit = ExitCode::SUCCESS;
    for task in tasks {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!(error = %join_err, "component panicked");
                exit = ExitCode::from(EXIT_RUNTIME_PANIC);
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "component aborted");
            }
            Err(_) => {
                warn!("component did not stop within the grace period");
            }
        }
    }

    info!("shutdown complete");
    exit
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Completes when SIGINT or SIGTERM arrives.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installation failed");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
