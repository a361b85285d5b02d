//! Grid trading bot entrypoint.
//!
//! Wires the database, read API, bot service and S/R scheduler together and
//! supervises graceful shutdown.

use clap::{Parser, Subcommand};
use gridtrader::api::{self, ApiContext};
use gridtrader::bot::{BotService, GridBot};
use gridtrader::client::{AnalyticsClient, AnalyticsOptions, SpotPriceClient, SrResult};
use gridtrader::config::Config;
use gridtrader::notify::Notifier;
use gridtrader::scheduler::{SrScheduler, SrSchedulerConfig};
use gridtrader::storage::{self, GridStateRepo, PriceRepo, SrRepo, TradeRepo};
use gridtrader::strategy::{self, GridParams};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period for the API server after the stop signal.
const API_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "gridtrader")]
#[command(about = "Automated ETH/USDC grid trading bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot, scheduler and read API (default)
    Run,
    /// Print the grid the configured parameters would produce, then exit
    PreviewGrid,
    /// Send a test webhook notification, then exit
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(Config::load());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cfg).await,
        Commands::PreviewGrid => preview_grid(cfg).await,
        Commands::TestNotify => test_notify(cfg).await,
    }
}

async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    cfg.validate()?;
    cfg.log_summary();

    // Root cancellation: SIGINT/SIGTERM unwinds every task.
    let root = CancellationToken::new();
    spawn_signal_listener(root.clone());

    // Database
    info!(
        host = %cfg.db_host,
        port = cfg.db_port,
        name = %cfg.db_name,
        "connecting to database"
    );
    let pool = storage::connect(&cfg.dsn()).await?;
    storage::migrate(&pool).await?;

    let price_repo = PriceRepo::new(pool.clone());
    let trade_repo = TradeRepo::new(pool.clone());
    let sr_repo = SrRepo::new(pool.clone());
    let grid_repo = GridStateRepo::new(pool.clone());

    // Shared analytics client (single instance for bot + scheduler), cache
    // warmed from the latest persisted sample.
    let analytics = build_analytics(&cfg, &sr_repo).await?;

    let notify = Arc::new(Notifier::new(
        &cfg.webhook_url,
        &cfg.bot_name,
        root.child_token(),
    ));

    // 1. Read API
    let api_ctx = Arc::new(ApiContext::new(pool.clone()));
    let api_task = {
        let cfg = cfg.clone();
        let cancel = root.child_token();
        tokio::spawn(async move {
            if let Err(e) = api::serve(
                api_ctx,
                cfg.api_port,
                &cfg.api_key,
                &cfg.cors_allow_origin,
                cancel,
            )
            .await
            {
                error!(error = %e, "API server error");
            }
        })
    };

    // 2. Grid bot
    let mode = if cfg.paper_trading_enabled {
        "PAPER MODE"
    } else {
        "LIVE MODE"
    };
    notify
        .send(&format!(
            "Starting ETH Grid Trader (ETH/{}) - {mode}",
            cfg.quote_token_symbol
        ))
        .await;

    let bot_cancel = root.child_token();
    let bot = GridBot::new(
        cfg.clone(),
        price_repo,
        trade_repo,
        grid_repo,
        notify.clone(),
        analytics.clone(),
        bot_cancel.clone(),
    )?;
    let service = Arc::new(BotService::start(bot, cfg.clone(), bot_cancel).await?);

    // 3. S/R scheduler (shares the analytics client, reads bot snapshots)
    let scheduler = analytics.map(|analytics| {
        let scheduler = Arc::new(SrScheduler::new(
            analytics,
            sr_repo,
            SrSchedulerConfig {
                interval: Duration::from_secs(3600),
                change_threshold: cfg.sr_change_threshold,
            },
            service.clone(),
        ));
        scheduler.clone().start(&root);
        scheduler
    });
    if scheduler.is_none() {
        info!("S/R scheduler skipped - no analytics API key configured");
    }

    info!("all services started successfully");

    // Wait for the stop signal, then drain in order: scheduler, bot, API.
    root.cancelled().await;
    info!("shutting down gracefully");

    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    service.shutdown().await;

    if tokio::time::timeout(API_SHUTDOWN_GRACE, api_task).await.is_err() {
        warn!("API server did not stop within the grace period");
    }

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn build_analytics(
    cfg: &Config,
    sr_repo: &SrRepo,
) -> anyhow::Result<Option<Arc<AnalyticsClient>>> {
    if cfg.dune_api_key.is_empty() {
        return Ok(None);
    }

    let analytics = Arc::new(AnalyticsClient::new(
        &cfg.dune_api_key,
        AnalyticsOptions {
            method: cfg.sr_method.clone(),
            lookback_days: cfg.sr_lookback_days,
            refresh_hours: cfg.sr_refresh_hours,
        },
    )?);

    match sr_repo.get_latest().await {
        Ok(Some(latest)) => analytics.seed_cache(SrResult {
            support: latest.support,
            resistance: latest.resistance,
            midpoint: latest.midpoint,
            avg_price: latest.avg_price.unwrap_or(0.0),
            method: latest.method,
            lookback_days: latest.lookback_days,
            fetched_at: latest.timestamp,
        }),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "could not warm S/R cache from database"),
    }

    Ok(Some(analytics))
}

fn spawn_signal_listener(root: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    root.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        root.cancel();
    });
}

async fn preview_grid(cfg: Arc<Config>) -> anyhow::Result<()> {
    let center = if cfg.grid_base_price > 0.0 {
        cfg.grid_base_price
    } else {
        let spot = SpotPriceClient::new()?;
        spot.eth_price(&CancellationToken::new()).await?
    };

    let grid = strategy::calculate_grid_levels(&GridParams {
        center_price: center,
        level_count: cfg.grid_levels,
        spacing_percent: cfg.grid_spacing_percent,
        amount_per_grid: cfg.amount_per_grid,
    })?;

    println!(
        "{}",
        strategy::format_grid_display(&grid, center, cfg.amount_per_grid)
    );
    Ok(())
}

async fn test_notify(cfg: Arc<Config>) -> anyhow::Result<()> {
    if cfg.webhook_url.is_empty() {
        anyhow::bail!("WEBHOOK_URL is not configured");
    }

    let notifier = Notifier::new(&cfg.webhook_url, &cfg.bot_name, CancellationToken::new());
    notifier
        .send("Test notification - webhook integration is working")
        .await;
    println!("test notification sent");
    Ok(())
}
