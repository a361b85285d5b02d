//! On-chain execution: a signing JSON-RPC client and the constant-product
//! router adapter.

pub mod router;

pub use router::UniswapRouter;

use crate::error::{BotError, Result};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::sync::Arc;

pub type EthClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// JSON-RPC client bound to the trading wallet. Gas price suggestions are
/// scaled by the configured multiplier before use.
#[derive(Clone)]
pub struct RpcClient {
    client: Arc<EthClient>,
    wallet: Address,
    gas_limit: u64,
    gas_multiplier: f64,
}

impl RpcClient {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        gas_limit: u64,
        gas_multiplier: f64,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| BotError::Exchange(format!("invalid RPC endpoint: {e}")))?;

        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| BotError::Exchange(format!("invalid private key: {e}")))?;
        let wallet = wallet.with_chain_id(chain_id);
        let address = wallet.address();

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            wallet: address,
            gas_limit,
            gas_multiplier,
        })
    }

    pub fn inner(&self) -> Arc<EthClient> {
        self.client.clone()
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Suggested gas price scaled by the multiplier.
    pub async fn gas_price(&self) -> Result<U256> {
        let price = self
            .client
            .get_gas_price()
            .await
            .map_err(|e| BotError::Exchange(format!("gas price: {e}")))?;
        Ok(apply_multiplier(price, self.gas_multiplier))
    }

    /// Wallet ETH balance in wei.
    pub async fn eth_balance_wei(&self) -> Result<U256> {
        self.client
            .get_balance(self.wallet, None)
            .await
            .map_err(|e| BotError::Exchange(format!("balance: {e}")))
    }
}

fn apply_multiplier(price: U256, multiplier: f64) -> U256 {
    let base = u128::try_from(price).unwrap_or(u128::MAX) as f64;
    U256::from((base * multiplier) as u128)
}

/// ETH amount to wei.
pub fn to_eth_wei(eth: f64) -> U256 {
    U256::from((eth.max(0.0) * 1e18) as u128)
}

/// Token amount to its smallest unit.
pub fn to_token_wei(amount: f64, decimals: u32) -> U256 {
    U256::from((amount.max(0.0) * 10f64.powi(decimals as i32)) as u128)
}

/// Wei to a human-readable ETH amount.
pub fn from_eth_wei(wei: U256) -> f64 {
    u128::try_from(wei).unwrap_or(u128::MAX) as f64 / 1e18
}

/// Smallest token unit to a human-readable amount.
pub fn from_token_wei(amount: U256, decimals: u32) -> f64 {
    u128::try_from(amount).unwrap_or(u128::MAX) as f64 / 10f64.powi(decimals as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wei_conversions_round_trip() {
        assert_eq!(to_eth_wei(1.0), U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(to_eth_wei(0.005), U256::from(5_000_000_000_000_000u128));
        assert!((from_eth_wei(to_eth_wei(0.0448)) - 0.0448).abs() < 1e-12);

        // USDC uses 6 decimals.
        assert_eq!(to_token_wei(100.0, 6), U256::from(100_000_000u128));
        assert!((from_token_wei(to_token_wei(99.95, 6), 6) - 99.95).abs() < 1e-9);
    }

    #[test]
    fn negative_amounts_clamp_to_zero() {
        assert_eq!(to_eth_wei(-1.0), U256::zero());
        assert_eq!(to_token_wei(-5.0, 6), U256::zero());
    }

    #[test]
    fn gas_multiplier_scales_price() {
        let base = U256::from(10_000_000_000u64); // 10 gwei
        let scaled = apply_multiplier(base, 1.2);
        assert_eq!(scaled, U256::from(12_000_000_000u64));
    }
}
