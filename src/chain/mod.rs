//! Kaptain contract client
//!
//! Thin I/O layer around the reporting contract:
//! - reads `reporterNonce()` for replay protection
//! - submits signed reports through `steer(bytes, bytes)`
//! - polls and logs contract events

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Filter, H256, U256};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::ChainConfig;
use crate::error::ReportError;
use crate::report::{ReplayCounterSource, SignedReport};

abigen!(
    KaptainContract,
    r#"[
        function reporterNonce() external view returns (uint256)
        function steer(bytes message, bytes signature) external
    ]"#
);

/// Read/write access to one Kaptain deployment
#[derive(Debug, Clone)]
pub struct KaptainClient {
    provider: Arc<Provider<Http>>,
    address: Address,
    chain_id: u64,
    watched: Vec<(String, Address)>,
}

impl KaptainClient {
    pub fn connect(config: &ChainConfig) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.clone())
            .with_context(|| format!("Invalid rpc_url '{}'", config.rpc_url))?;
        Ok(Self {
            provider: Arc::new(provider),
            address: config.kaptain_address()?,
            chain_id: config.chain_id,
            watched: config.watched_contracts()?,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Named contracts `watch_events` polls, Kaptain first
    pub fn watched(&self) -> &[(String, Address)] {
        &self.watched
    }

    fn contract_name(&self, address: Address) -> &str {
        self.watched
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(name, _)| name.as_str())
            .unwrap_or("unknown")
    }

    /// Current on-chain reporter nonce
    pub async fn reporter_nonce(&self) -> Result<U256> {
        let contract = KaptainContract::new(self.address, self.provider.clone());
        contract
            .reporter_nonce()
            .call()
            .await
            .context("Failed to call reporterNonce()")
    }

    /// Send the report's outer `(message, signature)` to `steer` and wait
    /// for the receipt. Returns the transaction hash.
    pub async fn submit(&self, report: &SignedReport, wallet: LocalWallet) -> Result<H256> {
        let signer = wallet.with_chain_id(self.chain_id);
        let client = Arc::new(SignerMiddleware::new(self.provider.as_ref().clone(), signer));
        let contract = KaptainContract::new(self.address, client);

        let (message, signature) = report.submission();
        info!(
            kaptain = %format!("{:#x}", self.address),
            nonce = %report.envelope.nonce,
            message_len = message.len(),
            "Submitting steer transaction"
        );

        let call = contract.steer(
            Bytes::from(message.to_vec()),
            Bytes::from(signature.to_vec()),
        );
        let pending = call
            .send()
            .await
            .context("Failed to submit steer transaction")?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .context("Steer transaction dropped before confirmation")?;

        info!(
            tx_hash = %format!("{:#x}", tx_hash),
            block = ?receipt.and_then(|r| r.block_number),
            "Steer transaction confirmed"
        );
        Ok(tx_hash)
    }

    /// Poll logs of every watched contract from the latest block and log
    /// each one under its contract name.
    ///
    /// Runs until the underlying filter stream ends.
    pub async fn watch_events(&self, poll_interval: Duration) -> Result<()> {
        let addresses: Vec<Address> = self.watched.iter().map(|(_, a)| *a).collect();
        let filter = Filter::new().address(addresses);
        let mut stream = self
            .provider
            .watch(&filter)
            .await
            .context("Failed to install log filter")?
            .interval(poll_interval);

        info!(
            contracts = ?self.watched.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "Watching contract events"
        );
        while let Some(log) = stream.next().await {
            info!(
                contract = self.contract_name(log.address),
                address = %format!("{:#x}", log.address),
                block = ?log.block_number,
                tx_hash = ?log.transaction_hash,
                topic0 = ?log.topics.first(),
                data = %format!("0x{}", hex::encode(&log.data)),
                "Contract event"
            );
        }
        error!("Contract event stream ended");
        Ok(())
    }
}

#[async_trait]
impl ReplayCounterSource for KaptainClient {
    async fn fetch_replay_counter(&self) -> Result<U256, ReportError> {
        self.reporter_nonce()
            .await
            .map_err(|e| ReportError::NonceFetchFailure(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchedContract;

    fn chain_config(address: &str) -> ChainConfig {
        ChainConfig {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 3,
            kaptain_address: address.to_string(),
            poll_interval_ms: 1000,
            watch: Vec::new(),
        }
    }

    #[test]
    fn test_connect_parses_address() {
        let client =
            KaptainClient::connect(&chain_config("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"))
                .unwrap();
        assert_eq!(
            format!("{:#x}", client.address()),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }

    #[test]
    fn test_connect_watches_configured_contracts() {
        let mut config = chain_config("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
        config.watch.push(WatchedContract {
            name: "kMCD".to_string(),
            address: "0x0000000000000000000000000000000000000abc".to_string(),
        });
        let client = KaptainClient::connect(&config).unwrap();

        let names: Vec<&str> = client.watched().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["kaptain", "kMCD"]);
        assert_eq!(client.contract_name(client.watched()[1].1), "kMCD");
        assert_eq!(client.contract_name(Address::zero()), "unknown");
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        assert!(KaptainClient::connect(&chain_config("not-an-address")).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_rpc_maps_to_nonce_fetch_failure() {
        let mut config = chain_config("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23");
        config.rpc_url = "http://127.0.0.1:9".to_string();
        let client = KaptainClient::connect(&config).unwrap();

        let err = client.fetch_replay_counter().await.unwrap_err();
        assert!(matches!(err, ReportError::NonceFetchFailure(_)));
    }
}
