//! Unit tests for the grid strategy engine.

use super::*;
use crate::types::Side;

fn level(index: usize, price: f64, side: Side) -> GridLevel {
    GridLevel {
        index,
        price,
        side,
        quantity: 100.0 / price,
        filled: false,
        filled_at: None,
        tx_hash: None,
    }
}

#[test]
fn midpoint_of_valid_band() {
    assert_eq!(calculate_midpoint(2400.0, 3000.0).unwrap(), 2700.0);
    assert!(calculate_midpoint(3000.0, 2400.0).is_err());
    assert!(calculate_midpoint(2500.0, 2500.0).is_err());
}

#[test]
fn grid_of_ten_levels_around_2700() {
    let grid = calculate_grid_levels(&GridParams {
        center_price: 2700.0,
        level_count: 10,
        spacing_percent: 2.0,
        amount_per_grid: 100.0,
    })
    .unwrap();

    assert_eq!(grid.len(), 10);

    // Sorted ascending with dense indices.
    for (i, pair) in grid.windows(2).enumerate() {
        assert!(
            pair[1].price > pair[0].price,
            "not ascending at index {i}: {} <= {}",
            pair[1].price,
            pair[0].price
        );
    }
    for (i, l) in grid.iter().enumerate() {
        assert_eq!(l.index, i);
        assert!(l.quantity > 0.0);
        assert!(!l.filled);
    }

    // Five buys strictly below center, five sells strictly above.
    let buys = grid.iter().filter(|l| l.side == Side::Buy).count();
    let sells = grid.iter().filter(|l| l.side == Side::Sell).count();
    assert_eq!((buys, sells), (5, 5));
    for l in &grid {
        match l.side {
            Side::Buy => assert!(l.price < 2700.0),
            Side::Sell => assert!(l.price > 2700.0),
        }
    }

    // Literal expectations: 2700 * 1.02^i.
    let expected = [
        2445.47, 2494.38, 2544.27, 2595.16, 2647.06, // buys
        2754.00, 2809.08, 2865.26, 2922.57, 2981.02, // sells
    ];
    for (l, want) in grid.iter().zip(expected) {
        assert!(
            (l.price - want).abs() < 0.01,
            "level {} price {:.2} != {:.2}",
            l.index,
            l.price,
            want
        );
    }

    // quantity = amount / price.
    let buy_low = &grid[4]; // buy @ ~2647.06
    assert!((buy_low.quantity - 0.037776).abs() < 1e-5);
    let sell_high = &grid[9]; // sell @ ~2981.02
    assert!((sell_high.quantity - 0.033546).abs() < 1e-5);
}

#[test]
fn odd_level_count_has_extra_sell() {
    let grid = calculate_grid_levels(&GridParams {
        center_price: 2000.0,
        level_count: 7,
        spacing_percent: 3.0,
        amount_per_grid: 50.0,
    })
    .unwrap();

    assert_eq!(grid.len(), 7);
    let buys = grid.iter().filter(|l| l.side == Side::Buy).count();
    let sells = grid.iter().filter(|l| l.side == Side::Sell).count();
    assert_eq!((buys, sells), (3, 4));
}

#[test]
fn grid_parameter_validation() {
    let cases = [
        GridParams {
            center_price: -1.0,
            level_count: 10,
            spacing_percent: 2.0,
            amount_per_grid: 100.0,
        },
        GridParams {
            center_price: 2700.0,
            level_count: 1,
            spacing_percent: 2.0,
            amount_per_grid: 100.0,
        },
        GridParams {
            center_price: 2700.0,
            level_count: 10,
            spacing_percent: 0.0,
            amount_per_grid: 100.0,
        },
        GridParams {
            center_price: 2700.0,
            level_count: 10,
            spacing_percent: 2.0,
            amount_per_grid: -5.0,
        },
    ];
    for (i, params) in cases.iter().enumerate() {
        assert!(
            calculate_grid_levels(params).is_err(),
            "case {i}: expected validation error"
        );
    }
}

#[test]
fn trigger_resolution_picks_lowest_matching_index() {
    let mut grid = vec![
        level(0, 2550.0, Side::Buy),
        level(1, 2600.0, Side::Buy),
        level(2, 2700.0, Side::Sell),
        level(3, 2750.0, Side::Sell),
    ];

    assert_eq!(find_triggered_level(2540.0, &grid), Some(0));
    assert_eq!(find_triggered_level(2590.0, &grid), Some(1));
    assert_eq!(find_triggered_level(2710.0, &grid), Some(2));
    assert_eq!(find_triggered_level(2650.0, &grid), None);

    // Filled levels are skipped.
    grid[0].filled = true;
    assert_eq!(find_triggered_level(2540.0, &grid), Some(1));
}

#[test]
fn trigger_detection_is_deterministic() {
    let grid = vec![
        level(0, 2550.0, Side::Buy),
        level(1, 2600.0, Side::Buy),
        level(2, 2700.0, Side::Sell),
    ];
    let first = find_triggered_level(2540.0, &grid);
    for _ in 0..10 {
        assert_eq!(find_triggered_level(2540.0, &grid), first);
    }
}

#[test]
fn opposite_index_pairs_adjacent_levels() {
    let buy = level(2, 2600.0, Side::Buy);
    assert_eq!(opposite_level_index(&buy, 6), Some(3));

    let sell = level(3, 2700.0, Side::Sell);
    assert_eq!(opposite_level_index(&sell, 6), Some(2));

    // Out of range on both ends.
    let bottom_sell = level(0, 2500.0, Side::Sell);
    assert_eq!(opposite_level_index(&bottom_sell, 5), None);

    let top_buy = level(4, 2900.0, Side::Buy);
    assert_eq!(opposite_level_index(&top_buy, 5), None);
}

#[test]
fn opposite_reset_clears_fill_state() {
    let mut grid = vec![
        level(0, 2550.0, Side::Buy),
        level(1, 2600.0, Side::Buy),
        level(2, 2700.0, Side::Sell),
        level(3, 2750.0, Side::Sell),
    ];

    // Fill buy@1 (2600); its opposite sell@2 (2700) was previously filled.
    grid[1].filled = true;
    grid[2].filled = true;
    grid[2].filled_at = Some(chrono::Utc::now());
    grid[2].tx_hash = Some("0xabc".to_string());

    assert_eq!(reset_opposite_level(&mut grid, 1), Some(2));
    assert!(!grid[2].filled);
    assert!(grid[2].filled_at.is_none());
    assert!(grid[2].tx_hash.is_none());

    // An unfilled opposite level stays untouched.
    grid[0].filled = true;
    grid[1].filled = false;
    assert_eq!(reset_opposite_level(&mut grid, 0), None);
    assert!(!grid[1].filled);

    // Out-of-range pairing is a no-op.
    let mut edge = vec![level(0, 2500.0, Side::Sell)];
    edge[0].filled = true;
    assert_eq!(reset_opposite_level(&mut edge, 0), None);
}

#[test]
fn stats_count_fills_per_side() {
    let mut grid = vec![
        level(0, 2500.0, Side::Buy),
        level(1, 2600.0, Side::Buy),
        level(2, 2700.0, Side::Sell),
        level(3, 2800.0, Side::Sell),
    ];
    grid[0].filled = true;
    grid[3].filled = true;

    let stats = grid_stats(&grid);
    assert_eq!(stats.levels, 4);
    assert_eq!(stats.filled_levels, 2);
    assert_eq!((stats.filled_buys, stats.pending_buys), (1, 1));
    assert_eq!((stats.filled_sells, stats.pending_sells), (1, 1));
    assert_eq!(stats.lowest_price, Some(2500.0));
    assert_eq!(stats.highest_price, Some(2800.0));

    assert_eq!(grid_stats(&[]).levels, 0);
}

#[test]
fn fallback_band_is_ten_percent_around_price() {
    let fb = fallback_sr(2700.0);
    assert!((fb.support - 2430.0).abs() < 1e-9);
    assert!((fb.resistance - 2970.0).abs() < 1e-9);
    assert_eq!(fb.midpoint, 2700.0);
    assert_eq!(fb.method, "fallback");
}

#[test]
fn price_outside_grid_range() {
    let grid = vec![
        level(0, 1000.0, Side::Buy),
        level(1, 1050.0, Side::Buy),
        level(2, 1100.0, Side::Sell),
        level(3, 1150.0, Side::Sell),
    ];

    assert!(!is_price_outside_grid(1075.0, &grid));
    assert!(!is_price_outside_grid(1000.0, &grid));
    assert!(!is_price_outside_grid(1150.0, &grid));
    assert!(is_price_outside_grid(999.9, &grid));
    assert!(is_price_outside_grid(1962.0, &grid));
    assert!(is_price_outside_grid(1000.0, &[]));
}

#[test]
fn all_side_filled_requires_nonempty_side() {
    let mut grid = vec![
        level(0, 2500.0, Side::Buy),
        level(1, 2600.0, Side::Buy),
        level(2, 2700.0, Side::Sell),
    ];

    assert!(!are_all_side_filled(&grid, Side::Buy));
    grid[0].filled = true;
    grid[1].filled = true;
    assert!(are_all_side_filled(&grid, Side::Buy));
    assert!(!are_all_side_filled(&grid, Side::Sell));

    // A side with no levels is never "all filled".
    let sells_only = vec![level(0, 2700.0, Side::Sell)];
    assert!(!are_all_side_filled(&sells_only, Side::Buy));
}

#[test]
fn midpoint_change_percent() {
    // 2700 -> 2800 is ~3.70%.
    let pct = sr_change_percent(2800.0, 2700.0);
    assert!((pct - 3.7037).abs() < 0.001);

    // 2700 -> 2900 is ~7.41%.
    let pct = sr_change_percent(2900.0, 2700.0);
    assert!((pct - 7.4074).abs() < 0.001);

    // Drops count by absolute value.
    let pct = sr_change_percent(2500.0, 2700.0);
    assert!((pct - 7.4074).abs() < 0.001);

    // No previous midpoint counts as a full change.
    assert_eq!(sr_change_percent(2700.0, 0.0), 100.0);
}

#[test]
fn display_renders_levels_and_handles_empty() {
    let mut grid = vec![level(0, 2600.0, Side::Buy), level(1, 2700.0, Side::Sell)];
    grid[1].filled = true;

    let out = format_grid_display(&grid, 2650.0, 100.0);
    assert!(out.contains("BUY "));
    assert!(out.contains("SELL"));
    assert!(out.contains("[X]"));
    assert!(out.contains("2650.00"));

    assert_eq!(
        format_grid_display(&[], 0.0, 0.0),
        "No grid levels initialized."
    );
}

#[test]
fn grid_levels_survive_json_round_trip() {
    let grid = calculate_grid_levels(&GridParams {
        center_price: 2700.0,
        level_count: 4,
        spacing_percent: 2.0,
        amount_per_grid: 100.0,
    })
    .unwrap();

    let json = serde_json::to_value(&grid).unwrap();
    let restored: Vec<GridLevel> = serde_json::from_value(json).unwrap();
    assert_eq!(restored, grid);
    assert_eq!(restored[0].side, Side::Buy);
}
