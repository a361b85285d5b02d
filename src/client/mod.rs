//! Outbound HTTP clients: retry executor, spot-price feed and the
//! support/resistance analytics provider.

pub mod analytics;
pub mod retry;
pub mod spot;

pub use analytics::{AnalyticsClient, AnalyticsOptions, SrResult};
pub use retry::{send_with_retry, RetryPolicy};
pub use spot::SpotPriceClient;
