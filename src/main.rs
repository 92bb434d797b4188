//! Quantsail: spot trading engine plus control/query API in one process.
//!
//! Boot order: configuration, repository, control plane, executor, engine
//! loop, then the HTTP/WS server. Invalid configuration, an unreachable
//! database, or live mode without credentials are fatal.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quantsail_engine::api::{self, AppState};
use quantsail_engine::auth::JwtService;
use quantsail_engine::config::{load_config, EnvSettings, ExecutionMode};
use quantsail_engine::control::{self, BotController};
use quantsail_engine::engine::TradingLoop;
use quantsail_engine::execution::{
    BinanceSpotAdapter, DryRunExecutor, ExecutionEngine, LiveExecutor,
};
use quantsail_engine::market_data::{BinanceMarketData, MarketDataProvider, StubMarketData};
use quantsail_engine::persistence::EngineRepository;
use quantsail_engine::security::EncryptionService;
use quantsail_engine::strategies::EnsembleSignalProvider;

#[derive(Parser, Debug)]
#[command(name = "quantsail", about = "Algorithmic spot trading engine and control API")]
struct Cli {
    /// Path to the JSON configuration document.
    #[arg(long, env = "ENGINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        std::env::set_var("ENGINE_CONFIG_PATH", path);
    }

    let env = EnvSettings::from_env();
    let config = load_config().context("configuration is invalid")?;
    info!(
        mode = config.execution.mode.as_str(),
        symbols = ?config.symbols.enabled,
        "configuration loaded"
    );

    let repo = EngineRepository::open(&env.database_url)
        .context("database is unreachable at boot")?;

    let (plane, arming) = control::connect(env.redis_url.as_deref()).await;
    let controller = BotController::new(plane.clone(), arming);

    let encryption = match &env.master_key {
        Some(key_hex) => Some(Arc::new(
            EncryptionService::new(key_hex).context("MASTER_KEY is invalid")?,
        )),
        None => None,
    };

    // Executor + market data per execution mode.
    let (execution, market_data): (Arc<dyn ExecutionEngine>, Arc<dyn MarketDataProvider>) =
        match config.execution.mode {
            ExecutionMode::Live => {
                let credentials = match &encryption {
                    Some(enc) => repo.get_active_exchange_credentials("binance", enc)?,
                    None => None,
                };
                let (api_key, secret) = match credentials {
                    Some(creds) => creds,
                    None => match (env.binance_api_key.clone(), env.binance_secret.clone()) {
                        (Some(k), Some(s)) => (k, s),
                        _ => bail!(
                            "live mode requires an active exchange key or \
                             BINANCE_API_KEY/BINANCE_SECRET"
                        ),
                    },
                };

                let adapter = Arc::new(BinanceSpotAdapter::new(
                    api_key,
                    secret,
                    env.binance_testnet,
                )?);
                let executor = LiveExecutor::new(repo.clone(), adapter);

                let open = repo.open_trades()?;
                if let Err(e) = executor.reconcile(&open).await {
                    warn!(error = %e, "startup reconciliation failed, continuing");
                }

                info!(testnet = env.binance_testnet, "live execution enabled");
                (
                    Arc::new(executor),
                    Arc::new(BinanceMarketData::new(env.binance_testnet)?),
                )
            }
            ExecutionMode::DryRun => {
                info!("dry-run execution enabled");
                (
                    Arc::new(DryRunExecutor::new()),
                    Arc::new(StubMarketData::new(dec!(50000))),
                )
            }
        };

    let mut trading_loop = TradingLoop::new(
        config.clone(),
        repo.clone(),
        market_data,
        Arc::new(EnsembleSignalProvider::new()),
        execution,
        plane.clone(),
    );
    let recovered = trading_loop.recover_open_positions().await?;
    if recovered > 0 {
        info!(recovered, "resumed open positions");
    }

    let shutdown_flag = trading_loop.shutdown_flag();
    let max_ticks = env.max_ticks;
    let engine_task = tokio::spawn(async move {
        trading_loop.run(max_ticks).await;
    });

    let state = AppState {
        config: Arc::new(config),
        repo,
        controller,
        jwt: Arc::new(JwtService::new(env.jwt_secret.clone())),
        encryption,
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "API listening");

    let serve_shutdown = shutdown_flag.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        serve_shutdown.store(true, Ordering::SeqCst);
    })
    .await
    .context("API server failed")?;

    shutdown_flag.store(true, Ordering::SeqCst);
    if let Err(e) = engine_task.await {
        error!(error = %e, "engine task panicked");
    }

    info!("engine stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
