//! Support/resistance refresh scheduler.
//!
//! Owns a periodic timer: on every tick it force-refreshes S/R, decides
//! whether the grid should be rebuilt, persists the sample and invokes the
//! hooks. The scheduler never mutates grid state itself; it only reads
//! snapshots and signals the bot service.

use crate::client::{AnalyticsClient, SrResult};
use crate::error::Result;
use crate::storage::{ChangeAnalysis, SrRepo};
use crate::strategy::{self, GridLevel};
use crate::types::{NewSrSample, Side};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Deadline for a single scheduled fetch, including the polling protocol.
const FETCH_DEADLINE: Duration = Duration::from_secs(90);

/// The subset of bot state the scheduler needs for decision-making. A deep
/// copy; the scheduler holds no locks across its own network I/O.
#[derive(Debug, Clone)]
pub struct BotState {
    pub grid: Vec<GridLevel>,
    pub last_price: f64,
}

/// Callbacks into the bot service. `on_sr_update` fires after every fetch;
/// `on_grid_recalculate` only when the rebuild decision is positive.
#[async_trait]
pub trait SchedulerHooks: Send + Sync {
    async fn bot_state(&self) -> Option<BotState>;
    async fn on_sr_update(&self, _sr: &SrResult) {}
    async fn on_grid_recalculate(&self, sr: &SrResult);
}

#[derive(Debug, Clone)]
pub struct SrSchedulerConfig {
    pub interval: Duration,
    pub change_threshold: f64,
}

impl Default for SrSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            change_threshold: 5.0,
        }
    }
}

struct SchedulerState {
    running: bool,
    cancel: Option<CancellationToken>,
}

pub struct SrScheduler {
    analytics: Arc<AnalyticsClient>,
    sr_repo: SrRepo,
    cfg: SrSchedulerConfig,
    hooks: Arc<dyn SchedulerHooks>,
    state: Mutex<SchedulerState>,
}

impl SrScheduler {
    pub fn new(
        analytics: Arc<AnalyticsClient>,
        sr_repo: SrRepo,
        mut cfg: SrSchedulerConfig,
        hooks: Arc<dyn SchedulerHooks>,
    ) -> Self {
        if cfg.interval.is_zero() {
            cfg.interval = SrSchedulerConfig::default().interval;
        }
        if cfg.change_threshold <= 0.0 {
            cfg.change_threshold = SrSchedulerConfig::default().change_threshold;
        }
        Self {
            analytics,
            sr_repo,
            cfg,
            hooks,
            state: Mutex::new(SchedulerState {
                running: false,
                cancel: None,
            }),
        }
    }

    /// Start the scheduler: an immediate one-shot fetch plus a recurring
    /// fetch on every interval. No-op when already running.
    pub fn start(self: Arc<Self>, parent: &CancellationToken) {
        let cancel = {
            let mut state = self.state.lock().expect("scheduler state lock poisoned");
            if state.running {
                info!("S/R scheduler already running");
                return;
            }
            state.running = true;
            let token = parent.child_token();
            state.cancel = Some(token.clone());
            token
        };

        // Initial fetch on startup, under its own deadline.
        let this = self.clone();
        let initial_cancel = cancel.clone();
        tokio::spawn(async move {
            let fetch = this.fetch_and_process(&initial_cancel);
            match tokio::time::timeout(FETCH_DEADLINE, fetch).await {
                Ok(Err(e)) => warn!(error = %e, "initial S/R fetch failed"),
                Err(_) => warn!("initial S/R fetch timed out"),
                Ok(Ok(())) => {}
            }
        });

        // Recurring fetches. The first interval tick fires one full period
        // after start, so it cannot overlap the initial fetch above.
        let interval = self.cfg.interval;
        let this = self;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let fetch = this.fetch_and_process(&cancel);
                        match tokio::time::timeout(FETCH_DEADLINE, fetch).await {
                            Ok(Err(e)) => warn!(error = %e, "S/R fetch failed"),
                            Err(_) => warn!("S/R fetch timed out"),
                            Ok(Ok(())) => {}
                        }
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "S/R scheduler started");
    }

    /// Signal stop and return immediately; in-flight fetches run to
    /// completion under their own deadline.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("scheduler state lock poisoned");
        if !state.running {
            return;
        }
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.running = false;
        info!("S/R scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .expect("scheduler state lock poisoned")
            .running
    }

    /// Manually trigger a fetch outside the normal schedule.
    pub async fn fetch_now(&self, cancel: &CancellationToken) -> Result<()> {
        info!("manual S/R fetch triggered");
        self.fetch_and_process(cancel).await
    }

    async fn fetch_and_process(&self, cancel: &CancellationToken) -> Result<()> {
        info!("fetching S/R levels");
        let sr = self
            .analytics
            .fetch_support_resistance(true, cancel)
            .await?;

        let change = match self
            .sr_repo
            .check_significant_change(sr.midpoint, self.cfg.change_threshold)
            .await
        {
            Ok(change) => Some(change),
            Err(e) => {
                warn!(error = %e, "could not check S/R change");
                None
            }
        };

        let bot_state = self.hooks.bot_state().await;
        let reasons = rebuild_reasons(change.as_ref(), bot_state.as_ref());
        let should_rebuild = !reasons.is_empty();

        self.sr_repo
            .record(&NewSrSample {
                timestamp: Utc::now(),
                method: sr.method.clone(),
                lookback_days: sr.lookback_days,
                support: sr.support,
                resistance: sr.resistance,
                midpoint: sr.midpoint,
                avg_price: Some(sr.avg_price),
                grid_recalculated: should_rebuild,
            })
            .await?;

        info!(
            support = sr.support,
            resistance = sr.resistance,
            midpoint = sr.midpoint,
            "S/R sample stored"
        );

        self.hooks.on_sr_update(&sr).await;

        if should_rebuild {
            info!(reasons = %reasons.join(", "), "recalculating grid");
            self.hooks.on_grid_recalculate(&sr).await;
        } else {
            let pct = change
                .as_ref()
                .and_then(|c| c.change_percent)
                .unwrap_or(0.0);
            info!(
                change_pct = pct,
                threshold = self.cfg.change_threshold,
                "grid stable - no recalculation needed"
            );
        }

        Ok(())
    }
}

/// The rebuild decision: midpoint drift beyond the threshold, price outside
/// the grid range, or a fully filled side. Returns the reason list; empty
/// means no rebuild.
pub(crate) fn rebuild_reasons(
    change: Option<&ChangeAnalysis>,
    bot: Option<&BotState>,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if let Some(change) = change {
        if change.has_changed {
            match change.change_percent {
                Some(pct) => reasons.push(format!("S/R midpoint changed {pct:.2}%")),
                None => reasons.push("first S/R fetch".to_string()),
            }
        }
    }

    if let Some(bot) = bot {
        if !bot.grid.is_empty() {
            if bot.last_price > 0.0 && strategy::is_price_outside_grid(bot.last_price, &bot.grid) {
                let (lo, hi) = grid_range(&bot.grid);
                reasons.push(format!(
                    "price ${:.2} outside grid range (${lo:.2} - ${hi:.2})",
                    bot.last_price
                ));
            }

            if strategy::are_all_side_filled(&bot.grid, Side::Buy) {
                reasons.push("all buy levels filled - opportunity to reset".to_string());
            }
            if strategy::are_all_side_filled(&bot.grid, Side::Sell) {
                reasons.push("all sell levels filled - opportunity to reset".to_string());
            }
        }
    }

    reasons
}

fn grid_range(grid: &[GridLevel]) -> (f64, f64) {
    grid.iter().fold((f64::MAX, f64::MIN), |(lo, hi), level| {
        (lo.min(level.price), hi.max(level.price))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(index: usize, price: f64, side: Side, filled: bool) -> GridLevel {
        GridLevel {
            index,
            price,
            side,
            quantity: 100.0 / price,
            filled,
            filled_at: None,
            tx_hash: None,
        }
    }

    fn stable_change(pct: f64, threshold: f64) -> ChangeAnalysis {
        ChangeAnalysis {
            has_changed: pct >= threshold,
            change_percent: Some(pct),
            previous: None,
            reason: String::new(),
        }
    }

    #[test]
    fn midpoint_drift_below_threshold_does_not_rebuild() {
        // prev 2700 -> new 2800 is ~3.70%, below a 5% threshold.
        let pct = strategy::sr_change_percent(2800.0, 2700.0);
        let change = stable_change(pct, 5.0);
        let reasons = rebuild_reasons(Some(&change), None);
        assert!(reasons.is_empty());
    }

    #[test]
    fn midpoint_drift_beyond_threshold_rebuilds() {
        // prev 2700 -> new 2900 is ~7.41%, beyond a 5% threshold.
        let pct = strategy::sr_change_percent(2900.0, 2700.0);
        let change = stable_change(pct, 5.0);
        let reasons = rebuild_reasons(Some(&change), None);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("midpoint changed"));
    }

    #[test]
    fn missing_previous_sample_always_rebuilds() {
        let change = ChangeAnalysis {
            has_changed: true,
            change_percent: None,
            previous: None,
            reason: "first S/R fetch".to_string(),
        };
        let reasons = rebuild_reasons(Some(&change), None);
        assert_eq!(reasons, vec!["first S/R fetch".to_string()]);
    }

    #[test]
    fn price_outside_grid_rebuilds_even_when_midpoint_is_stable() {
        // Threshold 50%: midpoint change alone would not trigger.
        let change = stable_change(3.0, 50.0);
        let bot = BotState {
            grid: vec![
                level(0, 1000.0, Side::Buy, false),
                level(1, 1050.0, Side::Buy, false),
                level(2, 1100.0, Side::Sell, false),
                level(3, 1150.0, Side::Sell, false),
            ],
            last_price: 1962.0,
        };

        let reasons = rebuild_reasons(Some(&change), Some(&bot));
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("outside grid range"));
    }

    #[test]
    fn directional_exhaustion_rebuilds() {
        let bot = BotState {
            grid: vec![
                level(0, 1000.0, Side::Buy, true),
                level(1, 1050.0, Side::Buy, true),
                level(2, 1100.0, Side::Sell, false),
            ],
            last_price: 1060.0,
        };

        let reasons = rebuild_reasons(None, Some(&bot));
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("all buy levels filled"));
    }

    #[test]
    fn empty_grid_skips_bot_state_conditions() {
        let bot = BotState {
            grid: Vec::new(),
            last_price: 1962.0,
        };
        assert!(rebuild_reasons(None, Some(&bot)).is_empty());
    }

    #[test]
    fn zero_last_price_skips_range_condition() {
        let bot = BotState {
            grid: vec![
                level(0, 1000.0, Side::Buy, false),
                level(1, 1100.0, Side::Sell, false),
            ],
            last_price: 0.0,
        };
        assert!(rebuild_reasons(None, Some(&bot)).is_empty());
    }

    #[test]
    fn multiple_reasons_accumulate() {
        let change = stable_change(8.0, 5.0);
        let bot = BotState {
            grid: vec![
                level(0, 1000.0, Side::Buy, true),
                level(1, 1100.0, Side::Sell, true),
            ],
            last_price: 1962.0,
        };

        let reasons = rebuild_reasons(Some(&change), Some(&bot));
        assert_eq!(reasons.len(), 4);
    }
}
