//! Risk guardian: per-trade and portfolio-level circuit breakers.

use crate::error::{BotError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Abstracts the daily trade count so the guardian can be tested without a
/// database.
#[async_trait]
pub trait DailyTradeCounter: Send + Sync {
    async fn count_today(&self) -> Result<i64>;
}

/// Risk thresholds from configuration. A zero value disables that check.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskLimits {
    pub max_daily_trades: i64,
    pub max_position_size_usd: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

pub struct Guardian {
    limits: RiskLimits,
    counter: Arc<dyn DailyTradeCounter>,
}

impl Guardian {
    pub fn new(limits: RiskLimits, counter: Arc<dyn DailyTradeCounter>) -> Self {
        Self { limits, counter }
    }

    /// Validate per-trade constraints before execution. Returns
    /// [`BotError::TradeRejected`] when the trade must be blocked; an
    /// unavailable counter blocks too.
    pub async fn pre_trade_check(&self, trade_usd_value: f64) -> Result<()> {
        if self.limits.max_position_size_usd > 0.0
            && trade_usd_value > self.limits.max_position_size_usd
        {
            return Err(BotError::TradeRejected(format!(
                "position size ${:.2} exceeds max ${:.2}",
                trade_usd_value, self.limits.max_position_size_usd
            )));
        }

        if self.limits.max_daily_trades > 0 {
            let count = self.counter.count_today().await.map_err(|e| {
                BotError::TradeRejected(format!("unable to verify daily trade count: {e}"))
            })?;
            if count >= self.limits.max_daily_trades {
                return Err(BotError::TradeRejected(format!(
                    "daily limit of {} trades reached ({} executed today)",
                    self.limits.max_daily_trades, count
                )));
            }
        }

        Ok(())
    }

    /// Evaluate portfolio-level circuit breakers. `pnl_percent` is the
    /// unrealized P&L as a percentage (-8.5 means down 8.5%). Returns
    /// [`BotError::CircuitBreaker`] when trading must halt; thresholds are
    /// inclusive.
    pub fn portfolio_check(&self, pnl_percent: f64) -> Result<()> {
        if self.limits.stop_loss_percent > 0.0 && pnl_percent <= -self.limits.stop_loss_percent {
            return Err(BotError::CircuitBreaker(format!(
                "STOP-LOSS triggered: portfolio down {:.2}% (threshold: -{:.2}%)",
                pnl_percent, self.limits.stop_loss_percent
            )));
        }

        if self.limits.take_profit_percent > 0.0 && pnl_percent >= self.limits.take_profit_percent {
            return Err(BotError::CircuitBreaker(format!(
                "TAKE-PROFIT triggered: portfolio up {:.2}% (threshold: +{:.2}%)",
                pnl_percent, self.limits.take_profit_percent
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCounter(i64);

    #[async_trait]
    impl DailyTradeCounter for FixedCounter {
        async fn count_today(&self) -> Result<i64> {
            Ok(self.0)
        }
    }

    struct FailingCounter;

    #[async_trait]
    impl DailyTradeCounter for FailingCounter {
        async fn count_today(&self) -> Result<i64> {
            Err(BotError::Upstream("connection refused".into()))
        }
    }

    fn guardian(limits: RiskLimits, count: i64) -> Guardian {
        Guardian::new(limits, Arc::new(FixedCounter(count)))
    }

    #[tokio::test]
    async fn position_size_limit_blocks_oversized_trades() {
        let g = guardian(
            RiskLimits {
                max_position_size_usd: 500.0,
                ..Default::default()
            },
            0,
        );

        assert!(g.pre_trade_check(499.99).await.is_ok());
        assert!(g.pre_trade_check(500.0).await.is_ok());
        assert!(matches!(
            g.pre_trade_check(500.01).await,
            Err(BotError::TradeRejected(_))
        ));
    }

    #[tokio::test]
    async fn daily_trade_limit_blocks_at_cap() {
        let limits = RiskLimits {
            max_daily_trades: 5,
            ..Default::default()
        };

        assert!(guardian(limits, 4).pre_trade_check(10.0).await.is_ok());
        assert!(matches!(
            guardian(limits, 5).pre_trade_check(10.0).await,
            Err(BotError::TradeRejected(_))
        ));
    }

    #[tokio::test]
    async fn counter_failure_blocks_with_cause() {
        let g = Guardian::new(
            RiskLimits {
                max_daily_trades: 5,
                ..Default::default()
            },
            Arc::new(FailingCounter),
        );

        match g.pre_trade_check(10.0).await {
            Err(BotError::TradeRejected(msg)) => {
                assert!(msg.contains("unable to verify daily trade count"))
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_thresholds_disable_checks() {
        let g = guardian(RiskLimits::default(), 1_000_000);
        assert!(g.pre_trade_check(f64::MAX / 2.0).await.is_ok());
        assert!(g.portfolio_check(-99.0).is_ok());
        assert!(g.portfolio_check(99.0).is_ok());
    }

    #[test]
    fn stop_loss_trips_inclusively_at_threshold() {
        let g = guardian(
            RiskLimits {
                stop_loss_percent: 10.0,
                ..Default::default()
            },
            0,
        );

        assert!(g.portfolio_check(-9.99).is_ok());
        assert!(matches!(
            g.portfolio_check(-10.0),
            Err(BotError::CircuitBreaker(_))
        ));
        assert!(matches!(
            g.portfolio_check(-15.0),
            Err(BotError::CircuitBreaker(_))
        ));
    }

    #[test]
    fn take_profit_trips_inclusively_at_threshold() {
        let g = guardian(
            RiskLimits {
                take_profit_percent: 20.0,
                ..Default::default()
            },
            0,
        );

        assert!(g.portfolio_check(19.99).is_ok());
        assert!(matches!(
            g.portfolio_check(20.0),
            Err(BotError::CircuitBreaker(_))
        ));
    }
}
