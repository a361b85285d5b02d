//! Grid trading bot.
//!
//! [`GridBot`] owns the active grid and the full tick sequence:
//! price read, risk gate, trigger detection, execution, persistence and
//! opposite-level reset. [`service::BotService`] owns the mutex around the
//! bot and runs the tick loop.

pub mod service;

pub use service::BotService;

use crate::client::{AnalyticsClient, SpotPriceClient, SrResult};
use crate::config::Config;
use crate::error::{BotError, Result};
use crate::exchange::{RpcClient, UniswapRouter};
use crate::notify::Notifier;
use crate::paper::{self, PaperTrade, PaperWallet, PAPER_GAS_COST_ETH};
use crate::risk::{Guardian, RiskLimits};
use crate::storage::{GridStateRepo, PriceRepo, TradeRepo};
use crate::strategy::{self, GridLevel, GridParams};
use crate::types::{NewGridState, NewTrade, Side};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Spot prices outside this band fail the sanity check and are discarded.
const PRICE_SANITY_MIN: f64 = 100.0;
const PRICE_SANITY_MAX: f64 = 100_000.0;

/// What the tick loop should do after a tick.
#[derive(Debug, PartialEq)]
pub enum TickAction {
    /// Proceed to the next scheduled tick.
    Continue,
    /// Sleep the post-trade cooldown before the next tick.
    Cooldown(Duration),
    /// Circuit breaker tripped: stop the loop for good.
    Halt,
}

/// Result of one swap execution (paper or live).
struct SwapExecution {
    tx_hash: String,
    slippage_percent: Option<f64>,
    gas_cost_eth: Option<f64>,
}

pub struct GridBot {
    cfg: Arc<Config>,
    spot: SpotPriceClient,
    analytics: Option<Arc<AnalyticsClient>>,
    price_repo: PriceRepo,
    trade_repo: TradeRepo,
    grid_repo: GridStateRepo,
    pub(crate) notify: Arc<Notifier>,
    guardian: Guardian,
    paper_wallet: Option<PaperWallet>,
    router: Option<UniswapRouter>,
    cancel: CancellationToken,

    pub grid: Vec<GridLevel>,
    pub last_price: f64,
    pub base_price: f64,
    trades_executed: i32,
    total_profit: f64,
    price_checks: u64,
    last_status_report: Option<DateTime<Utc>>,
    last_sr_refresh: Option<DateTime<Utc>>,
}

impl GridBot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        price_repo: PriceRepo,
        trade_repo: TradeRepo,
        grid_repo: GridStateRepo,
        notify: Arc<Notifier>,
        analytics: Option<Arc<AnalyticsClient>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let guardian = Guardian::new(
            RiskLimits {
                max_daily_trades: cfg.max_daily_trades,
                max_position_size_usd: cfg.max_position_size_usd,
                stop_loss_percent: cfg.stop_loss_percent,
                take_profit_percent: cfg.take_profit_percent,
            },
            Arc::new(trade_repo.clone()),
        );

        if analytics.is_some() {
            info!(
                method = %cfg.sr_method,
                lookback_days = cfg.sr_lookback_days,
                "S/R analytics configured"
            );
        } else {
            info!("S/R analytics not configured - using fallback (current price as midpoint)");
        }

        Ok(Self {
            spot: SpotPriceClient::new()?,
            analytics,
            price_repo,
            trade_repo,
            grid_repo,
            notify,
            guardian,
            paper_wallet: None,
            router: None,
            cancel,
            grid: Vec::new(),
            last_price: 0.0,
            base_price: cfg.grid_base_price,
            trades_executed: 0,
            total_profit: 0.0,
            price_checks: 0,
            last_status_report: None,
            last_sr_refresh: None,
            cfg,
        })
    }

    /// Load persisted state and set up the execution backend (paper wallet
    /// or live router).
    pub async fn init(&mut self) -> Result<()> {
        if let Err(e) = self.load_state().await {
            warn!(error = %e, "failed to load persisted state");
        }

        if self.cfg.paper_trading_enabled {
            self.init_paper_wallet().await?;
        } else {
            let rpc = RpcClient::new(
                &self.cfg.ethereum_api_endpoint,
                &self.cfg.private_key,
                self.cfg.chain_id,
                self.cfg.gas_limit,
                self.cfg.gas_multiplier,
            )?;
            info!(wallet = ?rpc.wallet_address(), "live trading client connected");
            self.router = Some(UniswapRouter::new(
                rpc,
                &self.cfg.uniswap_router_address,
                &self.cfg.weth_address,
                &self.cfg.quote_token_address,
                &self.cfg.quote_token_symbol,
                self.cfg.quote_token_decimals,
                self.cfg.slippage_tolerance,
            )?);
        }
        Ok(())
    }

    async fn init_paper_wallet(&mut self) -> Result<()> {
        let wallet = match self.grid_repo.get_paper_wallet().await? {
            Some(state) if state.eth_balance > 0.0 => {
                let wallet = PaperWallet::restore(&state)?;
                info!(
                    eth = wallet.eth_balance,
                    usdc = wallet.usdc_balance,
                    trades = wallet.trades.len(),
                    "paper wallet loaded from database"
                );
                wallet
            }
            _ => {
                info!(
                    eth = self.cfg.paper_initial_eth,
                    usdc = self.cfg.paper_initial_usdc,
                    "starting fresh paper wallet"
                );
                self.grid_repo
                    .initialize_paper_wallet(self.cfg.paper_initial_eth, self.cfg.paper_initial_usdc)
                    .await?;
                PaperWallet::new(self.cfg.paper_initial_eth, self.cfg.paper_initial_usdc)
            }
        };
        self.paper_wallet = Some(wallet);
        Ok(())
    }

    async fn load_state(&mut self) -> Result<()> {
        let Some(state) = self.grid_repo.get_active().await? else {
            info!("no existing state found in database - will initialize fresh");
            return Ok(());
        };

        if let Some(levels) = state.grid_levels {
            self.grid = serde_json::from_value(levels)?;
        }
        self.trades_executed = state.trades_executed;
        self.total_profit = state.total_profit;
        if let Some(base) = state.base_price {
            if base > 0.0 {
                self.base_price = base;
            }
        }
        self.last_sr_refresh = state.last_sr_refresh;

        info!(
            levels = self.grid.len(),
            trades = self.trades_executed,
            "state loaded from database"
        );
        Ok(())
    }

    /// Persist the grid and counters as the new active row. A failed save
    /// transaction propagates; the paper-wallet re-attach (so the
    /// replacement row keeps the wallet columns) is logged on failure.
    async fn save_state(&self) -> Result<()> {
        let levels = serde_json::to_value(&self.grid)?;

        self.grid_repo
            .save(&NewGridState {
                base_price: Some(self.base_price),
                grid_levels: levels,
                trades_executed: self.trades_executed,
                total_profit: self.total_profit,
                last_sr_refresh: self.last_sr_refresh,
            })
            .await?;

        if let Some(wallet) = &self.paper_wallet {
            if let Err(e) = self.grid_repo.update_paper_wallet(&wallet.snapshot()).await {
                error!(error = %e, "failed to save paper wallet state");
            }
        }
        Ok(())
    }

    /// Fetch the current price, enforcing the sanity band. Returns the last
    /// known good price when the fetch fails or the value is implausible.
    async fn fetch_price(&mut self) -> f64 {
        match self.spot.eth_price(&self.cancel).await {
            Ok(price) if (PRICE_SANITY_MIN..=PRICE_SANITY_MAX).contains(&price) => {
                self.last_price = price;
                if let Err(e) = self.price_repo.record(price, Utc::now()).await {
                    warn!(error = %e, "failed to record price");
                }
                price
            }
            Ok(price) => {
                warn!(price, "price failed sanity check, reusing last good price");
                self.last_price
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch price");
                self.last_price
            }
        }
    }

    /// Fetch S/R, falling back to a synthetic band around the current price
    /// when the provider is unavailable.
    async fn fetch_sr(&mut self) -> SrResult {
        if let Some(analytics) = self.analytics.clone() {
            match analytics.fetch_support_resistance(false, &self.cancel).await {
                Ok(sr) => {
                    self.last_sr_refresh = Some(Utc::now());
                    return sr;
                }
                Err(e) => {
                    warn!(error = %e, "S/R fetch failed - falling back to current price");
                }
            }
        }

        let price = self.fetch_price().await;
        let fb = strategy::fallback_sr(price);
        SrResult {
            support: fb.support,
            resistance: fb.resistance,
            midpoint: fb.midpoint,
            avg_price: 0.0,
            method: fb.method,
            lookback_days: fb.lookback_days,
            fetched_at: Utc::now(),
        }
    }

    /// (Re)build the grid around the preserved base price, or the fresh S/R
    /// midpoint when no base price is set.
    pub async fn initialize_grid(&mut self) -> Result<()> {
        let sr = self.fetch_sr().await;

        let mut center = self.base_price;
        if center == 0.0 {
            center = sr.midpoint;
        }
        self.base_price = center;

        let price = self.fetch_price().await;
        if price <= 0.0 {
            return Err(BotError::Upstream(
                "cannot initialize grid: no valid price available".into(),
            ));
        }

        self.notify
            .send(&format!(
                "S/R Analysis ({}, {}d): Support ${:.2} | Resistance ${:.2} | Midpoint ${:.2}",
                sr.method, sr.lookback_days, sr.support, sr.resistance, sr.midpoint
            ))
            .await;

        let grid = strategy::calculate_grid_levels(&GridParams {
            center_price: center,
            level_count: self.cfg.grid_levels,
            spacing_percent: self.cfg.grid_spacing_percent,
            amount_per_grid: self.cfg.amount_per_grid,
        })?;

        let (lo, hi) = (grid[0].price, grid[grid.len() - 1].price);
        self.grid = grid;
        self.save_state().await?;

        self.notify
            .send(&format!(
                "Grid initialized: {} levels from ${lo:.2} to ${hi:.2}, center at ${center:.2}",
                self.grid.len()
            ))
            .await;

        Ok(())
    }

    /// One tick: price, portfolio gate, trigger, execute.
    pub async fn tick(&mut self) -> TickAction {
        self.price_checks += 1;

        let price = self.fetch_price().await;
        if price <= 0.0 {
            warn!("could not fetch price, skipping tick");
            return TickAction::Continue;
        }

        if let Some(pnl) = self.portfolio_pnl_percent(price) {
            if let Err(e) = self.guardian.portfolio_check(pnl) {
                self.notify
                    .send(&format!("CIRCUIT BREAKER: {e} - halting trading"))
                    .await;
                error!(error = %e, "portfolio circuit breaker tripped");
                return TickAction::Halt;
            }
        }

        let mut cooled_down = false;
        if let Some(idx) = strategy::find_triggered_level(price, &self.grid) {
            let level = &self.grid[idx];
            info!(
                index = level.index,
                side = %level.side,
                level_price = level.price,
                price,
                "grid level triggered"
            );

            match self.execute_trade(idx, price).await {
                Ok(()) => cooled_down = true,
                Err(e) => warn!(error = %e, "trade execution failed"),
            }
        }

        self.maybe_report_status(price).await;

        if cooled_down {
            TickAction::Cooldown(Duration::from_secs(self.cfg.post_trade_cooldown_seconds))
        } else {
            TickAction::Continue
        }
    }

    async fn execute_trade(&mut self, idx: usize, current_price: f64) -> Result<()> {
        let level = self.grid[idx].clone();
        let trade_usd = level.quantity * current_price;

        if let Err(e) = self.guardian.pre_trade_check(trade_usd).await {
            self.notify.send(&format!("[RISK] {e}")).await;
            return Err(e);
        }

        let eth_amount = level.quantity;
        let usdc_amount = eth_amount * current_price;
        let prefix = if self.cfg.paper_trading_enabled {
            "[PAPER] "
        } else {
            ""
        };
        self.notify
            .send(&format!(
                "{prefix}Executing {} at grid level {}: ~{eth_amount:.6} ETH for ~{usdc_amount:.2} {} (@ ${current_price:.2}/ETH)",
                level.side, level.index, self.cfg.quote_token_symbol
            ))
            .await;

        let exec = if self.cfg.paper_trading_enabled {
            self.execute_paper_swap(&level, current_price).await?
        } else {
            self.execute_live_swap(level.side, eth_amount, usdc_amount)
                .await?
        };

        let now = Utc::now();
        {
            let level = &mut self.grid[idx];
            level.filled = true;
            level.filled_at = Some(now);
            level.tx_hash = Some(exec.tx_hash.clone());
        }
        self.trades_executed += 1;
        self.save_state().await?;

        let record = self
            .trade_repo
            .record(&NewTrade {
                timestamp: now,
                side: level.side,
                price: current_price,
                quantity: eth_amount,
                usd_value: usdc_amount,
                grid_level: Some(level.index as i32),
                tx_hash: Some(exec.tx_hash),
                is_paper_trade: self.cfg.paper_trading_enabled,
                slippage_percent: exec.slippage_percent,
                gas_cost_eth: exec.gas_cost_eth,
            })
            .await;
        if let Err(e) = record {
            warn!(error = %e, "failed to record trade");
        }

        self.reset_opposite_level(idx).await;
        Ok(())
    }

    async fn execute_paper_swap(
        &mut self,
        level: &GridLevel,
        current_price: f64,
    ) -> Result<SwapExecution> {
        let slip = paper::random_slippage(self.cfg.paper_slippage_percent);
        let gas = if self.cfg.paper_simulate_gas {
            PAPER_GAS_COST_ETH
        } else {
            0.0
        };

        let wallet = self
            .paper_wallet
            .as_mut()
            .ok_or_else(|| BotError::Exchange("paper wallet not initialized".into()))?;

        let mut eth_amount = level.quantity;
        let mut usdc_amount = eth_amount * current_price;

        match level.side {
            Side::Buy => {
                let actual_eth = eth_amount * (1.0 - slip);
                wallet.execute_buy(usdc_amount, actual_eth)?;
                eth_amount = actual_eth;
            }
            Side::Sell => {
                if wallet.eth_balance < eth_amount + gas {
                    return Err(BotError::InsufficientFunds(format!(
                        "ETH: have {:.6}, need {:.6}",
                        wallet.eth_balance,
                        eth_amount + gas
                    )));
                }
                usdc_amount *= 1.0 - slip;
                wallet.execute_sell(eth_amount, usdc_amount)?;
            }
        }

        wallet.deduct_gas(gas);
        wallet.record_trade(PaperTrade {
            id: 0,
            timestamp: String::new(),
            side: level.side,
            grid_level: level.index,
            trigger_price: level.price,
            execution_price: current_price,
            eth_amount,
            usdc_amount,
            slippage_percent: slip * 100.0,
            gas_cost: gas,
            balance_after: Default::default(),
        });

        let snapshot = wallet.snapshot();
        if let Err(e) = self.grid_repo.update_paper_wallet(&snapshot).await {
            warn!(error = %e, "failed to persist paper wallet");
        }

        let tx_hash = format!(
            "0xPAPER_{}_{:x}",
            level.side,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        info!(
            side = %level.side,
            eth = eth_amount,
            usdc = usdc_amount,
            slippage_pct = slip * 100.0,
            gas_eth = gas,
            "paper trade executed"
        );

        Ok(SwapExecution {
            tx_hash,
            slippage_percent: Some(slip * 100.0),
            gas_cost_eth: Some(gas),
        })
    }

    async fn execute_live_swap(
        &mut self,
        side: Side,
        eth_amount: f64,
        usdc_amount: f64,
    ) -> Result<SwapExecution> {
        let router = self
            .router
            .as_ref()
            .ok_or_else(|| BotError::Exchange("live router not initialized".into()))?;

        let swap = match side {
            Side::Buy => {
                self.notify
                    .send(&format!(
                        "Broadcasting BUY TX: {eth_amount:.6} ETH for {usdc_amount:.2} {}...",
                        self.cfg.quote_token_symbol
                    ))
                    .await;
                router.swap_quote_for_eth(usdc_amount, eth_amount).await
            }
            Side::Sell => {
                self.notify
                    .send(&format!(
                        "Broadcasting SELL TX: {eth_amount:.6} ETH for ~{usdc_amount:.2} {}...",
                        self.cfg.quote_token_symbol
                    ))
                    .await;
                router.swap_eth_for_quote(eth_amount).await
            }
        };

        let tx_hash = match swap {
            Ok(hash) => hash,
            Err(e) => {
                self.notify.send(&format!("{side} TX failed: {e}")).await;
                return Err(e);
            }
        };

        self.notify
            .send(&format!(
                "{side} TX confirmed: {}",
                router.explorer_url(&tx_hash)
            ))
            .await;

        let gas_cost_eth = router.gas_cost_eth().await.ok();
        Ok(SwapExecution {
            tx_hash,
            slippage_percent: None,
            gas_cost_eth,
        })
    }

    /// Re-arm the level paired with a fill so the mean-reversion leg can
    /// trade again.
    async fn reset_opposite_level(&mut self, filled_idx: usize) {
        if let Some(idx) = strategy::reset_opposite_level(&mut self.grid, filled_idx) {
            if let Err(e) = self.save_state().await {
                error!(error = %e, "failed to persist opposite-level reset");
            }
            info!(index = idx, "reset grid level for opposite trade");
        }
    }

    /// Unrealized portfolio P&L in percent; `None` when it cannot be
    /// determined (live mode has no balance tracking).
    fn portfolio_pnl_percent(&self, current_price: f64) -> Option<f64> {
        self.paper_wallet
            .as_ref()
            .map(|w| w.stats(current_price).unrealized_pnl_percent)
    }

    async fn maybe_report_status(&mut self, current_price: f64) {
        let interval = ChronoDuration::minutes(self.cfg.status_report_interval_minutes);
        if let Some(last) = self.last_status_report {
            if Utc::now() - last < interval {
                return;
            }
        }

        let stats = strategy::grid_stats(&self.grid);
        let prefix = if self.cfg.paper_trading_enabled {
            "[PAPER] "
        } else {
            ""
        };

        let (eth_balance, usdc_balance) = if let Some(wallet) = &self.paper_wallet {
            (wallet.eth_balance, wallet.usdc_balance)
        } else if let Some(router) = &self.router {
            (
                router.eth_balance().await.unwrap_or(0.0),
                router.token_balance().await.unwrap_or(0.0),
            )
        } else {
            (0.0, 0.0)
        };

        self.notify
            .send(&format!(
                "{prefix}Status: ETH @ ${current_price:.2} | ETH: {eth_balance:.4} (${:.2}) | {}: {usdc_balance:.2} | \
                 Grid: {}/{} buys, {}/{} sells | Checks: {} | Trades: {}",
                eth_balance * current_price,
                self.cfg.quote_token_symbol,
                stats.filled_buys,
                stats.filled_buys + stats.pending_buys,
                stats.filled_sells,
                stats.filled_sells + stats.pending_sells,
                self.price_checks,
                self.trades_executed,
            ))
            .await;

        if let Some(wallet) = &self.paper_wallet {
            let ps = wallet.stats(current_price);
            let sign = if ps.unrealized_pnl < 0.0 { "" } else { "+" };
            self.notify
                .send(&format!(
                    "[PAPER P&L] Initial: ${:.2} -> Current: ${:.2} | P&L: {sign}${:.2} ({sign}{:.2}%) | \
                     Gas: {:.6} ETH (${:.2}) | Running: {:.1}h",
                    ps.initial_value_usd,
                    ps.current_value_usd,
                    ps.unrealized_pnl,
                    ps.unrealized_pnl_percent,
                    ps.total_gas_spent,
                    ps.gas_spent_usd,
                    ps.running_time_hours,
                ))
                .await;
        }

        self.last_status_report = Some(Utc::now());
    }
}
