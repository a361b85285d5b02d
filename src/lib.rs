//! Automated ETH/USDC grid trading bot.
//!
//! Maintains a geometric price grid around a support/resistance midpoint and
//! executes paired buy/sell swaps against a constant-product DEX as the spot
//! price crosses grid levels.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Analytics (S/R) → change detector ─┐
//!                                                ├→ BotService (rebuild)
//! Tick loop → Spot price → Grid trigger → Risk ──┘      │
//!                                  │                    │
//!                               Router / Paper          │
//!                                  └──── Repositories ──┘── Read API
//! ```

pub mod api;
pub mod bot;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod paper;
pub mod risk;
pub mod scheduler;
pub mod storage;
pub mod strategy;
pub mod types;
