//! Paper trading wallet.
//!
//! An in-memory twin of the on-chain balances with a stochastic slippage
//! model and a fixed per-trade gas charge. The wallet itself is pure; the
//! bot persists its snapshot through the grid-state repository after each
//! mutation.

use crate::error::{BotError, Result};
use crate::types::{PaperWalletState, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flat gas charge per simulated trade, in ETH.
pub const PAPER_GAS_COST_ETH: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct PaperWallet {
    initial_eth: f64,
    initial_usdc: f64,
    pub eth_balance: f64,
    pub usdc_balance: f64,
    pub total_gas: f64,
    pub trades: Vec<PaperTrade>,
    pub start_time: DateTime<Utc>,
}

/// A simulated fill, kept inside the wallet's trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperTrade {
    #[serde(default)]
    pub id: usize,
    #[serde(default)]
    pub timestamp: String,
    pub side: Side,
    pub grid_level: usize,
    pub trigger_price: f64,
    pub execution_price: f64,
    pub eth_amount: f64,
    pub usdc_amount: f64,
    pub slippage_percent: f64,
    pub gas_cost: f64,
    #[serde(default)]
    pub balance_after: BalanceSnapshot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub eth: f64,
    pub usdc: f64,
}

/// Point-in-time valuation of the wallet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperStats {
    pub initial_eth: f64,
    pub initial_usdc: f64,
    pub current_eth: f64,
    pub current_usdc: f64,
    pub initial_value_usd: f64,
    pub current_value_usd: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_percent: f64,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub total_gas_spent: f64,
    pub gas_spent_usd: f64,
    pub running_time_hours: f64,
}

impl PaperWallet {
    pub fn new(initial_eth: f64, initial_usdc: f64) -> Self {
        Self {
            initial_eth,
            initial_usdc,
            eth_balance: initial_eth,
            usdc_balance: initial_usdc,
            total_gas: 0.0,
            trades: Vec::new(),
            start_time: Utc::now(),
        }
    }

    /// Rebuild a wallet from its persisted snapshot.
    pub fn restore(state: &PaperWalletState) -> Result<Self> {
        let trades: Vec<PaperTrade> = serde_json::from_value(state.trades.clone())
            .unwrap_or_default();
        Ok(Self {
            initial_eth: state.initial_eth,
            initial_usdc: state.initial_usdc,
            eth_balance: state.eth_balance,
            usdc_balance: state.usdc_balance,
            total_gas: state.total_gas_spent,
            trades,
            start_time: state.start_time.unwrap_or_else(Utc::now),
        })
    }

    /// Snapshot for persistence in the active grid-state row.
    pub fn snapshot(&self) -> PaperWalletState {
        PaperWalletState {
            eth_balance: self.eth_balance,
            usdc_balance: self.usdc_balance,
            total_gas_spent: self.total_gas,
            trades: serde_json::to_value(&self.trades).unwrap_or_else(|_| serde_json::json!([])),
            start_time: Some(self.start_time),
            initial_eth: self.initial_eth,
            initial_usdc: self.initial_usdc,
        }
    }

    /// Debit quote, credit asset.
    pub fn execute_buy(&mut self, usdc_amount: f64, eth_amount: f64) -> Result<()> {
        if self.usdc_balance < usdc_amount {
            return Err(BotError::InsufficientFunds(format!(
                "USDC: have {:.2}, need {:.2}",
                self.usdc_balance, usdc_amount
            )));
        }
        self.usdc_balance -= usdc_amount;
        self.eth_balance += eth_amount;
        Ok(())
    }

    /// Debit asset, credit quote.
    pub fn execute_sell(&mut self, eth_amount: f64, usdc_amount: f64) -> Result<()> {
        if self.eth_balance < eth_amount {
            return Err(BotError::InsufficientFunds(format!(
                "ETH: have {:.6}, need {:.6}",
                self.eth_balance, eth_amount
            )));
        }
        self.eth_balance -= eth_amount;
        self.usdc_balance += usdc_amount;
        Ok(())
    }

    pub fn deduct_gas(&mut self, gas_eth: f64) {
        self.eth_balance -= gas_eth;
        self.total_gas += gas_eth;
    }

    /// Append a trade to the wallet log, stamping id, timestamp and the
    /// post-trade balance snapshot.
    pub fn record_trade(&mut self, mut trade: PaperTrade) {
        trade.id = self.trades.len() + 1;
        trade.timestamp = Utc::now().to_rfc3339();
        trade.balance_after = BalanceSnapshot {
            eth: self.eth_balance,
            usdc: self.usdc_balance,
        };
        self.trades.push(trade);
    }

    pub fn stats(&self, current_eth_price: f64) -> PaperStats {
        let initial_value = self.initial_eth * current_eth_price + self.initial_usdc;
        let current_value = self.eth_balance * current_eth_price + self.usdc_balance;
        let pnl = current_value - initial_value;
        let pnl_pct = if initial_value > 0.0 {
            pnl / initial_value * 100.0
        } else {
            0.0
        };

        let buys = self.trades.iter().filter(|t| t.side == Side::Buy).count();

        PaperStats {
            initial_eth: self.initial_eth,
            initial_usdc: self.initial_usdc,
            current_eth: self.eth_balance,
            current_usdc: self.usdc_balance,
            initial_value_usd: initial_value,
            current_value_usd: current_value,
            unrealized_pnl: pnl,
            unrealized_pnl_percent: pnl_pct,
            total_trades: self.trades.len(),
            buy_trades: buys,
            sell_trades: self.trades.len() - buys,
            total_gas_spent: self.total_gas,
            gas_spent_usd: self.total_gas * current_eth_price,
            running_time_hours: (Utc::now() - self.start_time).num_seconds() as f64 / 3600.0,
        }
    }
}

/// Uniform slippage sample in `[0, max_percent/100)`.
pub fn random_slippage(max_percent: f64) -> f64 {
    rand::random::<f64>() * max_percent / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(side: Side) -> PaperTrade {
        PaperTrade {
            id: 0,
            timestamp: String::new(),
            side,
            grid_level: 0,
            trigger_price: 2000.0,
            execution_price: 2000.0,
            eth_amount: 0.05,
            usdc_amount: 100.0,
            slippage_percent: 0.4,
            gas_cost: PAPER_GAS_COST_ETH,
            balance_after: BalanceSnapshot::default(),
        }
    }

    #[test]
    fn buy_with_slippage_and_gas() {
        // 1.0 ETH / 1000 USDC; buy 0.05 ETH at $2000 with 0.4% slippage.
        let mut wallet = PaperWallet::new(1.0, 1000.0);
        let slip = 0.004;
        let actual_eth = 0.05 * (1.0 - slip);

        wallet.execute_buy(100.0, actual_eth).unwrap();
        wallet.deduct_gas(PAPER_GAS_COST_ETH);

        assert!((wallet.usdc_balance - 900.0).abs() < 1e-9);
        assert!((wallet.eth_balance - (1.0 + 0.0498 - 0.005)).abs() < 1e-9);
        assert!((wallet.total_gas - 0.005).abs() < 1e-12);
    }

    #[test]
    fn buy_rejects_insufficient_quote() {
        let mut wallet = PaperWallet::new(1.0, 50.0);
        let err = wallet.execute_buy(100.0, 0.05).unwrap_err();
        assert!(matches!(err, BotError::InsufficientFunds(_)));
        // Balances untouched on rejection.
        assert_eq!(wallet.usdc_balance, 50.0);
        assert_eq!(wallet.eth_balance, 1.0);
    }

    #[test]
    fn sell_rejects_insufficient_asset() {
        let mut wallet = PaperWallet::new(0.01, 1000.0);
        let err = wallet.execute_sell(0.05, 100.0).unwrap_err();
        assert!(matches!(err, BotError::InsufficientFunds(_)));
    }

    #[test]
    fn sell_credits_quote() {
        let mut wallet = PaperWallet::new(1.0, 1000.0);
        wallet.execute_sell(0.05, 99.6).unwrap();
        assert!((wallet.eth_balance - 0.95).abs() < 1e-9);
        assert!((wallet.usdc_balance - 1099.6).abs() < 1e-9);
    }

    #[test]
    fn trade_log_stamps_ids_and_balances() {
        let mut wallet = PaperWallet::new(1.0, 1000.0);
        wallet.execute_buy(100.0, 0.0498).unwrap();
        wallet.record_trade(trade(Side::Buy));
        wallet.execute_sell(0.05, 99.0).unwrap();
        wallet.record_trade(trade(Side::Sell));

        assert_eq!(wallet.trades.len(), 2);
        assert_eq!(wallet.trades[0].id, 1);
        assert_eq!(wallet.trades[1].id, 2);
        assert!((wallet.trades[1].balance_after.usdc - wallet.usdc_balance).abs() < 1e-9);
        assert!(!wallet.trades[0].timestamp.is_empty());
    }

    #[test]
    fn stats_value_portfolio_at_current_price() {
        let mut wallet = PaperWallet::new(1.0, 1000.0);
        wallet.execute_buy(100.0, 0.05).unwrap();

        // At $2000/ETH: initial = 3000, current = 1.05*2000 + 900 = 3000.
        let stats = wallet.stats(2000.0);
        assert!((stats.initial_value_usd - 3000.0).abs() < 1e-9);
        assert!((stats.current_value_usd - 3000.0).abs() < 1e-9);
        assert!(stats.unrealized_pnl.abs() < 1e-9);

        // At $2200/ETH the extra 0.05 ETH is up.
        let stats = wallet.stats(2200.0);
        assert!(stats.unrealized_pnl > 0.0);
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let mut wallet = PaperWallet::new(1.0, 1000.0);
        wallet.execute_buy(100.0, 0.0498).unwrap();
        wallet.deduct_gas(0.005);
        wallet.record_trade(trade(Side::Buy));

        let restored = PaperWallet::restore(&wallet.snapshot()).unwrap();
        assert!((restored.eth_balance - wallet.eth_balance).abs() < 1e-12);
        assert!((restored.usdc_balance - wallet.usdc_balance).abs() < 1e-12);
        assert_eq!(restored.trades.len(), 1);
        assert_eq!(restored.trades[0].side, Side::Buy);
    }

    #[test]
    fn slippage_sample_stays_in_range() {
        for _ in 0..1000 {
            let slip = random_slippage(0.5);
            assert!((0.0..0.005).contains(&slip));
        }
        assert_eq!(random_slippage(0.0), 0.0);
    }
}
