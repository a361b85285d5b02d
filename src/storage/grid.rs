//! Grid-state repository.
//!
//! The active row holds the live grid plus the embedded paper-wallet
//! columns. `save` replaces the active row transactionally so exactly one
//! `is_active = true` row exists after every successful save.

use crate::error::Result;
use crate::types::{GridStateRecord, NewGridState, PaperWalletState};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const GRID_COLUMNS: &str = "id, base_price, grid_levels_json, trades_executed, total_profit, \
                            last_sr_refresh, is_active, created_at, updated_at, \
                            paper_eth_balance, paper_usdc_balance, paper_total_gas_spent, \
                            paper_trades_json, paper_start_time, paper_initial_eth, \
                            paper_initial_usdc";

#[derive(Clone)]
pub struct GridStateRepo {
    pool: PgPool,
}

impl GridStateRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The single active row, if any.
    pub async fn get_active(&self) -> Result<Option<GridStateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {GRID_COLUMNS} FROM grid_state \
             WHERE is_active = true ORDER BY updated_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(grid_state_from_row).transpose()
    }

    /// Replace the active row: within one transaction, flip all active rows
    /// inactive and insert the new row as active.
    pub async fn save(&self, state: &NewGridState) -> Result<GridStateRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE grid_state SET is_active = false WHERE is_active = true")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            "INSERT INTO grid_state \
             (base_price, grid_levels_json, trades_executed, total_profit, \
              last_sr_refresh, is_active, updated_at) \
             VALUES ($1, $2, $3, $4, $5, true, NOW()) \
             RETURNING {GRID_COLUMNS}"
        ))
        .bind(state.base_price)
        .bind(&state.grid_levels)
        .bind(state.trades_executed)
        .bind(state.total_profit)
        .bind(state.last_sr_refresh)
        .fetch_one(&mut *tx)
        .await?;
        let record = grid_state_from_row(&row)?;

        tx.commit().await?;
        Ok(record)
    }

    /// Write the paper-wallet columns of the active row.
    pub async fn update_paper_wallet(&self, wallet: &PaperWalletState) -> Result<()> {
        sqlx::query(
            "UPDATE grid_state \
             SET paper_eth_balance = $1, \
                 paper_usdc_balance = $2, \
                 paper_total_gas_spent = $3, \
                 paper_trades_json = $4, \
                 paper_start_time = $5, \
                 paper_initial_eth = $6, \
                 paper_initial_usdc = $7, \
                 updated_at = NOW() \
             WHERE is_active = true",
        )
        .bind(wallet.eth_balance)
        .bind(wallet.usdc_balance)
        .bind(wallet.total_gas_spent)
        .bind(&wallet.trades)
        .bind(wallet.start_time)
        .bind(wallet.initial_eth)
        .bind(wallet.initial_usdc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seed the paper-wallet columns on the active row. No-op when the row
    /// already carries a wallet.
    pub async fn initialize_paper_wallet(&self, initial_eth: f64, initial_usdc: f64) -> Result<()> {
        if let Some(state) = self.get_active().await? {
            if state.paper_eth_balance.is_some() {
                return Ok(());
            }
        }

        sqlx::query(
            "UPDATE grid_state \
             SET paper_eth_balance = $1, \
                 paper_usdc_balance = $2, \
                 paper_initial_eth = $1, \
                 paper_initial_usdc = $2, \
                 paper_total_gas_spent = 0, \
                 paper_trades_json = '[]'::jsonb, \
                 paper_start_time = NOW(), \
                 updated_at = NOW() \
             WHERE is_active = true",
        )
        .bind(initial_eth)
        .bind(initial_usdc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The paper wallet embedded in the active row, if present.
    pub async fn get_paper_wallet(&self) -> Result<Option<PaperWalletState>> {
        let Some(state) = self.get_active().await? else {
            return Ok(None);
        };
        if state.paper_eth_balance.is_none() {
            return Ok(None);
        }

        Ok(Some(PaperWalletState {
            eth_balance: state.paper_eth_balance.unwrap_or(0.0),
            usdc_balance: state.paper_usdc_balance.unwrap_or(0.0),
            total_gas_spent: state.paper_total_gas_spent.unwrap_or(0.0),
            trades: state.paper_trades.unwrap_or_else(|| serde_json::json!([])),
            start_time: state.paper_start_time,
            initial_eth: state.paper_initial_eth.unwrap_or(0.0),
            initial_usdc: state.paper_initial_usdc.unwrap_or(0.0),
        }))
    }
}

fn grid_state_from_row(row: &PgRow) -> Result<GridStateRecord> {
    Ok(GridStateRecord {
        id: row.try_get("id")?,
        base_price: row.try_get("base_price")?,
        grid_levels: row.try_get("grid_levels_json")?,
        trades_executed: row.try_get("trades_executed")?,
        total_profit: row.try_get("total_profit")?,
        last_sr_refresh: row.try_get("last_sr_refresh")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        paper_eth_balance: row.try_get("paper_eth_balance")?,
        paper_usdc_balance: row.try_get("paper_usdc_balance")?,
        paper_total_gas_spent: row.try_get("paper_total_gas_spent")?,
        paper_trades: row.try_get("paper_trades_json")?,
        paper_start_time: row.try_get("paper_start_time")?,
        paper_initial_eth: row.try_get("paper_initial_eth")?,
        paper_initial_usdc: row.try_get("paper_initial_usdc")?,
    })
}
