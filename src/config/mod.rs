//! Configuration management for the reporter
//!
//! Loads from YAML/TOML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use ethers::types::{Address, U256};
use serde::Deserialize;

use crate::report::ReportParams;
use crate::signing::MessageSigner;
use crate::types::{Observation, PRICES_KIND};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub reporter: ReporterConfig,
    pub chain: ChainConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    /// Tag for logging
    pub tag: String,
    /// Observation kind to report
    pub kind: String,
    /// Environment variable holding the hex private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Chain ID used for transaction signing
    pub chain_id: u64,
    /// Kaptain contract address
    pub kaptain_address: String,
    /// Event polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Extra contracts whose events `watch` logs alongside Kaptain
    #[serde(default)]
    pub watch: Vec<WatchedContract>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchedContract {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Prices to report when none are given on the command line
    #[serde(default)]
    pub prices: Vec<PriceEntry>,
    /// Vault kUSD delta, decimal string
    pub vault_delta: String,
    /// Whether the vault delta is an increase
    pub is_increase: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceEntry {
    pub symbol: String,
    pub price: f64,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("reporter.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("reporter.kind", PRICES_KIND)?
            .set_default("reporter.private_key_env", "REPORTER_PRIVATE_KEY")?
            // Chain defaults
            .set_default("chain.rpc_url", "http://localhost:8545")?
            .set_default("chain.chain_id", 3)?
            .set_default(
                "chain.kaptain_address",
                "0x0000000000000000000000000000000000000000",
            )?
            .set_default("chain.poll_interval_ms", 5000)?
            // Report defaults
            .set_default("report.vault_delta", "0")?
            .set_default("report.is_increase", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (KINE_REPORTER__*)
            .add_source(Environment::with_prefix("KINE_REPORTER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "reporter={} kind={} rpc={} chain_id={} kaptain={} prices={}",
            self.reporter.tag,
            self.reporter.kind,
            self.chain.rpc_url,
            self.chain.chain_id,
            self.chain.kaptain_address,
            self.report.prices.len()
        )
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        let var = &self.reporter.private_key_env;
        let pk = match std::env::var(var) {
            Ok(pk) => pk,
            Err(_) => bail!("Required environment variable {} is not set", var),
        };

        // Validate private key format
        let pk = pk.trim();
        if !pk.starts_with("0x") || pk.len() != 66 {
            bail!(
                "{} must be a hex string with 0x prefix (66 chars total)",
                var
            );
        }

        Ok(())
    }

    /// Signer built from the configured private key variable
    pub fn signer(&self) -> Result<MessageSigner> {
        self.validate_env()?;
        let pk = std::env::var(&self.reporter.private_key_env)?;
        MessageSigner::from_hex(&pk).with_context(|| {
            format!(
                "Invalid private key in {}",
                self.reporter.private_key_env
            )
        })
    }
}

impl ChainConfig {
    pub fn kaptain_address(&self) -> Result<Address> {
        self.kaptain_address
            .parse()
            .with_context(|| format!("Invalid kaptain_address '{}'", self.kaptain_address))
    }

    /// Named addresses to watch, Kaptain first. Repeated addresses are
    /// listed once under their first name.
    pub fn watched_contracts(&self) -> Result<Vec<(String, Address)>> {
        let mut contracts = vec![("kaptain".to_string(), self.kaptain_address()?)];
        for contract in &self.watch {
            let address: Address = contract.address.parse().with_context(|| {
                format!("Invalid address '{}' for {}", contract.address, contract.name)
            })?;
            if contracts.iter().all(|(_, a)| *a != address) {
                contracts.push((contract.name.clone(), address));
            }
        }
        Ok(contracts)
    }
}

impl ReportConfig {
    pub fn params(&self) -> Result<ReportParams> {
        let vault_delta = U256::from_dec_str(self.vault_delta.trim())
            .with_context(|| format!("Invalid vault_delta '{}'", self.vault_delta))?;
        Ok(ReportParams {
            vault_delta,
            is_increase: self.is_increase,
        })
    }

    /// Configured prices as observations of `kind` at `timestamp`
    pub fn observations(&self, kind: &str, timestamp: u64) -> Result<Vec<Observation>> {
        let pairs = self
            .prices
            .iter()
            .map(|p| (p.symbol.clone(), p.price));
        Observation::from_pairs(kind, timestamp, pairs).context("Invalid configured prices")
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_config(vault_delta: &str) -> ReportConfig {
        ReportConfig {
            prices: vec![
                PriceEntry {
                    symbol: "KINE".to_string(),
                    price: 2.8,
                },
                PriceEntry {
                    symbol: "BTC".to_string(),
                    price: 42_000.0,
                },
            ],
            vault_delta: vault_delta.to_string(),
            is_increase: true,
        }
    }

    #[test]
    fn test_params_parse_decimal_delta() {
        let params = report_config("1000000000000000000000").params().unwrap();
        assert_eq!(
            params.vault_delta,
            U256::from_dec_str("1000000000000000000000").unwrap()
        );
        assert!(params.is_increase);
        assert!(report_config("-5").params().is_err());
    }

    #[test]
    fn test_observations_keep_config_order() {
        let obs = report_config("0").observations(PRICES_KIND, 7).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].key, "KINE");
        assert_eq!(obs[1].key, "BTC");
    }

    fn chain_config(kaptain: &str, watch: &[(&str, &str)]) -> ChainConfig {
        ChainConfig {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 3,
            kaptain_address: kaptain.to_string(),
            poll_interval_ms: 1000,
            watch: watch
                .iter()
                .map(|(name, address)| WatchedContract {
                    name: name.to_string(),
                    address: address.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_bad_kaptain_address() {
        assert!(chain_config("kaptain", &[]).kaptain_address().is_err());
    }

    #[test]
    fn test_watched_contracts() {
        let kaptain = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";
        let kusd = "0x0000000000000000000000000000000000000abc";
        let chain = chain_config(
            kaptain,
            &[("kUSD", kusd), ("controller", kaptain), ("kusdMinter", kusd)],
        );
        let names: Vec<String> = chain
            .watched_contracts()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["kaptain", "kUSD"]);

        let bad = chain_config(kaptain, &[("timelock", "0x123")]);
        assert!(bad.watched_contracts().is_err());
    }
}
