//! Grid strategy engine.
//!
//! Pure functions over `Vec<GridLevel>`: geometric level generation around a
//! center price, trigger detection, opposite-level pairing and the predicates
//! the scheduler uses to decide whether the grid should be rebuilt.

#[cfg(test)]
mod tests;

use crate::error::{BotError, Result};
use crate::types::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// A pre-planned limit order at a computed price.
///
/// `quantity` is the quote-denominated budget divided by the level price, so
/// every level carries the same notional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridLevel {
    pub index: usize,
    pub price: f64,
    pub side: Side,
    pub quantity: f64,
    #[serde(default)]
    pub filled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Fill/pending breakdown of a grid.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStats {
    pub levels: usize,
    pub lowest_price: Option<f64>,
    pub highest_price: Option<f64>,
    pub filled_levels: usize,
    pub pending_buys: usize,
    pub pending_sells: usize,
    pub filled_buys: usize,
    pub filled_sells: usize,
}

/// Synthetic S/R band used when the analytics provider is unavailable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSr {
    pub support: f64,
    pub resistance: f64,
    pub midpoint: f64,
    pub method: String,
    pub lookback_days: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct GridParams {
    pub center_price: f64,
    pub level_count: usize,
    pub spacing_percent: f64,
    pub amount_per_grid: f64,
}

/// Midpoint of a support/resistance band. Fails unless `support < resistance`.
pub fn calculate_midpoint(support: f64, resistance: f64) -> Result<f64> {
    if support >= resistance {
        return Err(BotError::InvalidParameter(format!(
            "invalid S/R: support ({support:.2}) >= resistance ({resistance:.2})"
        )));
    }
    Ok((support + resistance) / 2.0)
}

/// Generate a geometric grid around `center_price`.
///
/// Levels sit at `center * (1 + spacing/100)^i` for `i` in `-n/2 ..= n/2`,
/// skipping `i = 0` for even counts. Buys below center, sells above; the
/// result is sorted ascending by price with dense indices.
pub fn calculate_grid_levels(params: &GridParams) -> Result<Vec<GridLevel>> {
    if params.center_price <= 0.0 {
        return Err(BotError::InvalidParameter(
            "center price must be positive".into(),
        ));
    }
    if params.level_count < 2 {
        return Err(BotError::InvalidParameter(
            "level count must be at least 2".into(),
        ));
    }
    if params.spacing_percent <= 0.0 {
        return Err(BotError::InvalidParameter(
            "spacing percent must be positive".into(),
        ));
    }
    if params.amount_per_grid <= 0.0 {
        return Err(BotError::InvalidParameter(
            "amount per grid must be positive".into(),
        ));
    }

    let half_levels = (params.level_count / 2) as i32;
    let even = params.level_count % 2 == 0;

    let mut grid = Vec::with_capacity(params.level_count);
    for i in -half_levels..=half_levels {
        if i == 0 && even {
            continue;
        }

        let multiplier = (1.0 + params.spacing_percent / 100.0).powi(i);
        let level_price = params.center_price * multiplier;
        let side = if i < 0 { Side::Buy } else { Side::Sell };

        grid.push(GridLevel {
            index: 0,
            price: level_price,
            side,
            quantity: params.amount_per_grid / level_price,
            filled: false,
            filled_at: None,
            tx_hash: None,
        });
    }

    grid.sort_by(|a, b| a.price.total_cmp(&b.price));
    for (i, level) in grid.iter_mut().enumerate() {
        level.index = i;
    }

    Ok(grid)
}

/// First unfilled level (by ascending index) that the current price crosses:
/// a buy at or below the level price, or a sell at or above it. At most one
/// level per call; the tick loop handles one fill per tick.
pub fn find_triggered_level(current_price: f64, grid: &[GridLevel]) -> Option<usize> {
    grid.iter().position(|level| {
        if level.filled {
            return false;
        }
        match level.side {
            Side::Buy => current_price <= level.price,
            Side::Sell => current_price >= level.price,
        }
    })
}

/// Index of the level that pairs with a fill: the next level up for a buy,
/// the next level down for a sell. `None` when out of range.
pub fn opposite_level_index(filled: &GridLevel, grid_len: usize) -> Option<usize> {
    let idx = match filled.side {
        Side::Buy => filled.index.checked_add(1)?,
        Side::Sell => filled.index.checked_sub(1)?,
    };
    (idx < grid_len).then_some(idx)
}

/// Re-arm the level paired with a fill: if the opposite level exists and is
/// currently filled, clear its fill state. Returns the re-armed index.
pub fn reset_opposite_level(grid: &mut [GridLevel], filled_idx: usize) -> Option<usize> {
    let filled = grid.get(filled_idx)?.clone();
    let idx = opposite_level_index(&filled, grid.len())?;

    let adjacent = &mut grid[idx];
    if !adjacent.filled {
        return None;
    }
    adjacent.filled = false;
    adjacent.filled_at = None;
    adjacent.tx_hash = None;
    Some(idx)
}

/// Aggregate fill statistics. Assumes the grid is sorted ascending by price.
pub fn grid_stats(grid: &[GridLevel]) -> GridStats {
    let Some(first) = grid.first() else {
        return GridStats::default();
    };

    let mut stats = GridStats {
        levels: grid.len(),
        lowest_price: Some(first.price),
        highest_price: grid.last().map(|l| l.price),
        ..GridStats::default()
    };

    for level in grid {
        match (level.side, level.filled) {
            (Side::Buy, true) => {
                stats.filled_buys += 1;
                stats.filled_levels += 1;
            }
            (Side::Buy, false) => stats.pending_buys += 1,
            (Side::Sell, true) => {
                stats.filled_sells += 1;
                stats.filled_levels += 1;
            }
            (Side::Sell, false) => stats.pending_sells += 1,
        }
    }
    stats
}

/// Synthetic S/R band centered on the current price: `[0.9P, 1.1P]`.
pub fn fallback_sr(current_price: f64) -> FallbackSr {
    FallbackSr {
        support: current_price * 0.9,
        resistance: current_price * 1.1,
        midpoint: current_price,
        method: "fallback".to_string(),
        lookback_days: 0,
    }
}

/// True when the price has left the grid's price range entirely. An empty
/// grid counts as outside.
pub fn is_price_outside_grid(current_price: f64, grid: &[GridLevel]) -> bool {
    let mut prices = grid.iter().map(|l| l.price);
    let Some(first) = prices.next() else {
        return true;
    };
    let (lo, hi) = prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
    current_price < lo || current_price > hi
}

/// True when every level on `side` is filled. False for a side with no levels.
pub fn are_all_side_filled(grid: &[GridLevel], side: Side) -> bool {
    let mut count = 0;
    let mut filled = 0;
    for level in grid.iter().filter(|l| l.side == side) {
        count += 1;
        if level.filled {
            filled += 1;
        }
    }
    count > 0 && filled == count
}

/// Absolute midpoint change in percent. A zero previous midpoint counts as a
/// full change.
pub fn sr_change_percent(new_midpoint: f64, old_midpoint: f64) -> f64 {
    if old_midpoint == 0.0 {
        return 100.0;
    }
    ((new_midpoint - old_midpoint) / old_midpoint * 100.0).abs()
}

/// Render the grid as a console box, highest price first.
pub fn format_grid_display(grid: &[GridLevel], center_price: f64, amount_per_grid: f64) -> String {
    if grid.is_empty() {
        return "No grid levels initialized.".to_string();
    }

    let mut sorted: Vec<&GridLevel> = grid.iter().collect();
    sorted.sort_by(|a, b| b.price.total_cmp(&a.price));

    let mut out = String::new();
    out.push_str("┌─────────────────────────────────────────────────┐\n");
    out.push_str("│              GRID LEVELS (USD)                  │\n");
    out.push_str("├─────────────────────────────────────────────────┤\n");

    for level in sorted {
        let status = if level.filled { "[X]" } else { "[ ]" };
        let side = match level.side {
            Side::Buy => "BUY ",
            Side::Sell => "SELL",
        };
        let _ = writeln!(
            out,
            "│ {} {} @ {:10.2} │ {:>15} │",
            status,
            side,
            level.price,
            format!("{:.6} ETH", level.quantity)
        );
    }

    out.push_str("├─────────────────────────────────────────────────┤\n");
    let _ = writeln!(
        out,
        "│  Center: ${center_price:8.2}  │  ${amount_per_grid:.0}/level  │"
    );
    out.push_str("└─────────────────────────────────────────────────┘");

    out
}
