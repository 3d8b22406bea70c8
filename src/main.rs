use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kine_reporter::chain::KaptainClient;
use kine_reporter::config::AppConfig;
use kine_reporter::encoding::AdapterRegistry;
use kine_reporter::types::{now_secs, Observation, ObservationValue};
use kine_reporter::ReportBuilder;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, help = "Emit logs as JSON")]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (and optionally submit) a signed price report
    Report {
        #[arg(long = "price", help = "Price as SYMBOL=VALUE, repeatable")]
        prices: Vec<String>,
        #[arg(long, help = "Vault kUSD delta (decimal); overrides config")]
        vault_delta: Option<String>,
        #[arg(long, overrides_with = "no_increase", help = "Mark the vault delta as an increase")]
        increase: bool,
        #[arg(long, overrides_with = "increase", help = "Mark the vault delta as a decrease")]
        no_increase: bool,
        #[arg(long, help = "Send the report to Kaptain.steer")]
        submit: bool,
    },
    /// Print the current on-chain reporter nonce
    Nonce,
    /// Log Kaptain and configured contract events as they arrive
    Watch,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// `--increase` / `--no-increase` override of the configured direction;
/// the last one given wins
fn increase_override(increase: bool, no_increase: bool) -> Option<bool> {
    match (increase, no_increase) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn parse_price(raw: &str) -> Result<(String, ObservationValue)> {
    let Some((symbol, value)) = raw.split_once('=') else {
        bail!("Price '{}' must look like SYMBOL=VALUE", raw);
    };
    let symbol = symbol.trim();
    if symbol.is_empty() {
        bail!("Price '{}' has an empty symbol", raw);
    }
    Ok((symbol.to_string(), ObservationValue::Text(value.trim().to_string())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = AppConfig::load()?;
    info!(config = %config, "Configuration loaded");

    let client = KaptainClient::connect(&config.chain)?;

    match args.command {
        Command::Nonce => {
            let nonce = client.reporter_nonce().await?;
            println!("{}", nonce);
        }
        Command::Watch => {
            let interval = Duration::from_millis(config.chain.poll_interval_ms);
            tokio::select! {
                res = client.watch_events(interval) => res?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down event watcher"),
            }
        }
        Command::Report {
            prices,
            vault_delta,
            increase,
            no_increase,
            submit,
        } => {
            let timestamp = now_secs();
            let kind = config.reporter.kind.as_str();
            let observations = if prices.is_empty() {
                config.report.observations(kind, timestamp)?
            } else {
                let pairs = prices
                    .iter()
                    .map(|p| parse_price(p))
                    .collect::<Result<Vec<_>>>()?;
                Observation::from_pairs(kind, timestamp, pairs)?
            };
            if observations.is_empty() {
                bail!("No prices to report: pass --price or set report.prices");
            }

            let mut params = config.report.params()?;
            if let Some(delta) = vault_delta {
                params.vault_delta = U256::from_dec_str(delta.trim())
                    .with_context(|| format!("Invalid --vault-delta '{}'", delta))?;
            }
            if let Some(is_increase) = increase_override(increase, no_increase) {
                params.is_increase = is_increase;
            }

            let signer = config.signer()?;
            let builder = ReportBuilder::new(Arc::new(AdapterRegistry::with_defaults()), signer);
            let report = builder
                .build_report_with(&observations, &client, params)
                .await?;

            println!("{}", serde_json::to_string_pretty(&report.envelope.to_json())?);
            println!("message:   {}", report.outer.message_hex());
            println!("signature: {}", report.outer.signature_hex());

            if submit {
                let tx_hash = client
                    .submit(&report, builder.signer().wallet().clone())
                    .await?;
                println!("tx: {:#x}", tx_hash);
            }
        }
    }

    Ok(())
}
