//! Error types shared across the bot.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// All retry attempts were exhausted against an upstream service.
    #[error("all {attempts} attempts failed, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("operation cancelled")]
    Cancelled,

    /// An upstream service answered, but with a bad status or bad data.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Guardian pre-trade rejection. The tick continues without trading.
    #[error("trade blocked: {0}")]
    TradeRejected(String),

    /// Guardian portfolio trip. Terminal for the tick loop.
    #[error("circuit breaker: {0}")]
    CircuitBreaker(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("exchange error: {0}")]
    Exchange(String),
}
