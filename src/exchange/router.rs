//! Uniswap V2 router adapter.
//!
//! Wraps the router and quote-token contracts behind the two swap calls the
//! bot needs, plus allowance management, balance reads and the gas estimate.

use crate::error::{BotError, Result};
use crate::exchange::{
    from_eth_wei, from_token_wei, to_eth_wei, to_token_wei, EthClient, RpcClient,
};
use chrono::Utc;
use ethers::abi::Abi;
use ethers::contract::Contract;
use ethers::types::{Address, H256, U256};
use tracing::info;

const EXPLORER_TX_PREFIX: &str = "https://etherscan.io/tx/";
const SWAP_DEADLINE_SECS: i64 = 20 * 60;

fn router_abi() -> Abi {
    ethers::abi::parse_abi(&[
        "function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) returns (uint256[] amounts)",
        "function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) payable returns (uint256[] amounts)",
    ])
    .expect("static router ABI")
}

fn erc20_abi() -> Abi {
    ethers::abi::parse_abi(&[
        "function balanceOf(address owner) view returns (uint256)",
        "function allowance(address owner, address spender) view returns (uint256)",
        "function approve(address spender, uint256 value) returns (bool)",
    ])
    .expect("static ERC20 ABI")
}

pub struct UniswapRouter {
    rpc: RpcClient,
    router: Contract<EthClient>,
    quote_token: Contract<EthClient>,
    router_addr: Address,
    weth_addr: Address,
    quote_addr: Address,
    quote_symbol: String,
    quote_decimals: u32,
    slippage_percent: f64,
}

impl UniswapRouter {
    pub fn new(
        rpc: RpcClient,
        router_addr: &str,
        weth_addr: &str,
        quote_addr: &str,
        quote_symbol: &str,
        quote_decimals: u32,
        slippage_percent: f64,
    ) -> Result<Self> {
        let router_addr: Address = router_addr
            .parse()
            .map_err(|e| BotError::Exchange(format!("invalid router address: {e}")))?;
        let weth_addr: Address = weth_addr
            .parse()
            .map_err(|e| BotError::Exchange(format!("invalid WETH address: {e}")))?;
        let quote_addr: Address = quote_addr
            .parse()
            .map_err(|e| BotError::Exchange(format!("invalid quote token address: {e}")))?;

        let client = rpc.inner();
        Ok(Self {
            router: Contract::new(router_addr, router_abi(), client.clone()),
            quote_token: Contract::new(quote_addr, erc20_abi(), client),
            rpc,
            router_addr,
            weth_addr,
            quote_addr,
            quote_symbol: quote_symbol.to_string(),
            quote_decimals,
            slippage_percent,
        })
    }

    pub fn explorer_url(&self, tx_hash: &str) -> String {
        format!("{EXPLORER_TX_PREFIX}{tx_hash}")
    }

    /// Quote-token balance of the trading wallet, human-readable.
    pub async fn token_balance(&self) -> Result<f64> {
        let balance: U256 = self
            .quote_token
            .method::<_, U256>("balanceOf", self.rpc.wallet_address())
            .map_err(|e| BotError::Exchange(format!("balanceOf: {e}")))?
            .call()
            .await
            .map_err(|e| BotError::Exchange(format!("balanceOf call: {e}")))?;
        Ok(from_token_wei(balance, self.quote_decimals))
    }

    /// ETH balance of the trading wallet, human-readable.
    pub async fn eth_balance(&self) -> Result<f64> {
        Ok(from_eth_wei(self.rpc.eth_balance_wei().await?))
    }

    /// Ensure the router can spend at least twice the required quote amount;
    /// broadcasts a max-allowance approval when it cannot.
    pub async fn ensure_allowance(&self, required_amount: f64) -> Result<()> {
        let current: U256 = self
            .quote_token
            .method::<_, U256>("allowance", (self.rpc.wallet_address(), self.router_addr))
            .map_err(|e| BotError::Exchange(format!("allowance: {e}")))?
            .call()
            .await
            .map_err(|e| BotError::Exchange(format!("allowance call: {e}")))?;

        let required = to_token_wei(required_amount * 2.0, self.quote_decimals);
        if current >= required {
            return Ok(());
        }

        info!(token = %self.quote_symbol, "setting allowance for router");
        let gas_price = self.rpc.gas_price().await?;
        let call = self
            .quote_token
            .method::<_, bool>("approve", (self.router_addr, U256::MAX))
            .map_err(|e| BotError::Exchange(format!("approve: {e}")))?
            .gas(self.rpc.gas_limit())
            .gas_price(gas_price);

        let pending = call
            .send()
            .await
            .map_err(|e| BotError::Exchange(format!("approve tx: {e}")))?;
        let tx_hash: H256 = *pending;
        info!(url = %self.explorer_url(&format!("{tx_hash:?}")), "allowance TX broadcast");
        Ok(())
    }

    /// Swap an exact quote amount for ETH. The minimum output is reduced by
    /// the configured slippage tolerance. Returns the transaction hash.
    pub async fn swap_quote_for_eth(&self, quote_amount: f64, min_eth_out: f64) -> Result<String> {
        self.ensure_allowance(quote_amount).await?;

        let path = vec![self.quote_addr, self.weth_addr];
        let deadline = U256::from((Utc::now().timestamp() + SWAP_DEADLINE_SECS) as u64);
        let amount_in = to_token_wei(quote_amount, self.quote_decimals);
        let min_out = to_eth_wei(min_eth_out * (1.0 - self.slippage_percent / 100.0));

        let gas_price = self.rpc.gas_price().await?;
        let call = self
            .router
            .method::<_, Vec<U256>>(
                "swapExactTokensForETH",
                (
                    amount_in,
                    min_out,
                    path,
                    self.rpc.wallet_address(),
                    deadline,
                ),
            )
            .map_err(|e| BotError::Exchange(format!("swapExactTokensForETH: {e}")))?
            .gas(self.rpc.gas_limit())
            .gas_price(gas_price);

        let pending = call
            .send()
            .await
            .map_err(|e| BotError::Exchange(format!("swap tx: {e}")))?;
        let tx_hash: H256 = *pending;
        Ok(format!("{tx_hash:?}"))
    }

    /// Swap an exact ETH amount for the quote token, carried as native
    /// value. Returns the transaction hash.
    pub async fn swap_eth_for_quote(&self, eth_amount: f64) -> Result<String> {
        let path = vec![self.weth_addr, self.quote_addr];
        let deadline = U256::from((Utc::now().timestamp() + SWAP_DEADLINE_SECS) as u64);
        let value = to_eth_wei(eth_amount);

        let gas_price = self.rpc.gas_price().await?;
        let call = self
            .router
            .method::<_, Vec<U256>>(
                "swapExactETHForTokens",
                (
                    U256::zero(),
                    path,
                    self.rpc.wallet_address(),
                    deadline,
                ),
            )
            .map_err(|e| BotError::Exchange(format!("swapExactETHForTokens: {e}")))?
            .value(value)
            .gas(self.rpc.gas_limit())
            .gas_price(gas_price);

        let pending = call
            .send()
            .await
            .map_err(|e| BotError::Exchange(format!("swap tx: {e}")))?;
        let tx_hash: H256 = *pending;
        Ok(format!("{tx_hash:?}"))
    }

    /// Estimated gas cost of one transaction in ETH:
    /// `suggested gas price x multiplier x gas limit`.
    pub async fn gas_cost_eth(&self) -> Result<f64> {
        let gas_price = self.rpc.gas_price().await?;
        let cost = gas_price * U256::from(self.rpc.gas_limit());
        Ok(from_eth_wei(cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abis_parse() {
        let router = router_abi();
        assert!(router.function("swapExactTokensForETH").is_ok());
        assert!(router.function("swapExactETHForTokens").is_ok());

        let erc20 = erc20_abi();
        assert!(erc20.function("approve").is_ok());
        assert!(erc20.function("allowance").is_ok());
    }

    #[test]
    fn explorer_url_prefixes_hash() {
        let rpc = RpcClient::new(
            "http://localhost:8545",
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            1,
            250_000,
            1.2,
        )
        .unwrap();
        let router = UniswapRouter::new(
            rpc,
            "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "USDC",
            6,
            1.5,
        )
        .unwrap();

        assert_eq!(
            router.explorer_url("0xabc"),
            "https://etherscan.io/tx/0xabc"
        );
    }
}
