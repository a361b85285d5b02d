//! Bot service: owns the mutex around [`GridBot`] and runs the tick loop.
//!
//! Every external exposure of the grid (snapshots for the scheduler, rebuild
//! triggers) goes through the same mutex as the tick itself, so grid
//! mutation never races with tick evaluation. The post-trade cooldown sleeps
//! outside the mutex: a scheduler rebuild may interleave with the cooldown,
//! never with a tick's mutation sequence.

use crate::bot::{GridBot, TickAction};
use crate::client::SrResult;
use crate::config::Config;
use crate::error::Result;
use crate::scheduler::{BotState, SchedulerHooks};
use crate::strategy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct BotService {
    bot: Arc<Mutex<GridBot>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BotService {
    /// Initialize the bot and spawn its tick loop. `cancel` is the bot's own
    /// stop token (a child of the root token); a circuit-breaker trip cancels
    /// it from inside the loop.
    pub async fn start(mut bot: GridBot, cfg: Arc<Config>, cancel: CancellationToken) -> Result<Self> {
        bot.init().await?;
        info!("grid trading bot initialized");

        let bot = Arc::new(Mutex::new(bot));
        let task = tokio::spawn(run_loop(bot.clone(), cfg, cancel.clone()));

        Ok(Self {
            bot,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Snapshot of the grid and last price for the scheduler. Deep-copies
    /// under the bot mutex and releases it before returning.
    pub async fn snapshot(&self) -> Option<BotState> {
        let bot = self.bot.lock().await;
        if bot.grid.is_empty() {
            return None;
        }
        Some(BotState {
            grid: bot.grid.clone(),
            last_price: bot.last_price,
        })
    }

    /// Rebuild the grid from a fresh S/R midpoint. Serialized with ticks by
    /// the bot mutex.
    pub async fn rebuild_grid(&self) {
        let mut bot = self.bot.lock().await;
        info!("recalculating grid with new S/R midpoint");
        bot.base_price = 0.0;
        if let Err(e) = bot.initialize_grid().await {
            error!(error = %e, "grid recalculation failed");
        }
    }

    /// Signal the tick loop to stop and wait for it to drain. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("bot stopped");
    }
}

#[async_trait]
impl SchedulerHooks for BotService {
    async fn bot_state(&self) -> Option<BotState> {
        self.snapshot().await
    }

    async fn on_grid_recalculate(&self, _sr: &SrResult) {
        self.rebuild_grid().await;
    }
}

async fn run_loop(bot: Arc<Mutex<GridBot>>, cfg: Arc<Config>, cancel: CancellationToken) {
    {
        let mut bot = bot.lock().await;
        bot.notify
            .send(&format!(
                "Starting ETH grid trader with {} levels, {:.1}% spacing",
                cfg.grid_levels, cfg.grid_spacing_percent
            ))
            .await;

        if bot.grid.is_empty() {
            if let Err(e) = bot.initialize_grid().await {
                error!(error = %e, "failed to initialize grid");
                return;
            }
        }

        let grid_display =
            strategy::format_grid_display(&bot.grid, bot.base_price, cfg.amount_per_grid);
        info!("\n{}", grid_display);
    }

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.price_check_interval_seconds.max(1)));
    // A tick starts only after the previous tick (and its cooldown) finished.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let bot = bot.lock().await;
                bot.notify.send("Grid trader shutting down").await;
                return;
            }
            _ = interval.tick() => {
                let action = {
                    let mut bot = bot.lock().await;
                    bot.tick().await
                };

                match action {
                    TickAction::Continue => {}
                    TickAction::Cooldown(duration) => {
                        // The mutex is released here: a scheduler rebuild may
                        // run during the cooldown.
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                let bot = bot.lock().await;
                                bot.notify.send("Grid trader shutting down").await;
                                return;
                            }
                            _ = tokio::time::sleep(duration) => {}
                        }
                    }
                    TickAction::Halt => {
                        // Terminal: the loop closes its own stop token and is
                        // not restarted by the supervisor.
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    }
}
