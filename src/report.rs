//! Report assembly: inner signing, envelope, outer signing
//!
//! A report is built in three strictly sequential stages:
//! 1. every observation is encoded and signed on its own;
//! 2. the signed arrays are wrapped in an envelope carrying
//!    `nonce = on-chain reporter nonce + 1`;
//! 3. the ABI-encoded envelope is signed like any other message.
//!
//! The outer `(message, signature)` pair is what `Kaptain.steer` accepts.

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::types::U256;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::encoding::{encode_observations, AdapterRegistry};
use crate::error::{ReportError, Result};
use crate::signing::{MessageSigner, SignedMessage};
use crate::types::Observation;

/// Source of the contract's current reporter nonce
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplayCounterSource: Send + Sync {
    /// Read the nonce fresh from chain state. Never cached.
    async fn fetch_replay_counter(&self) -> Result<U256>;
}

/// Caller-supplied business inputs carried through the envelope untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportParams {
    pub vault_delta: U256,
    pub is_increase: bool,
}

/// Outer batch decoded by the contract's steer path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEnvelope {
    pub messages: Vec<Vec<u8>>,
    pub signatures: Vec<Vec<u8>>,
    pub symbols: Vec<String>,
    pub vault_delta: U256,
    pub is_increase: bool,
    pub nonce: U256,
}

impl ReportEnvelope {
    /// `(bytes[], bytes[], string[], uint256, bool, uint256)`
    pub fn layout() -> Vec<ParamType> {
        vec![
            ParamType::Array(Box::new(ParamType::Bytes)),
            ParamType::Array(Box::new(ParamType::Bytes)),
            ParamType::Array(Box::new(ParamType::String)),
            ParamType::Uint(256),
            ParamType::Bool,
            ParamType::Uint(256),
        ]
    }

    pub fn abi_encode(&self) -> Vec<u8> {
        let bytes_array =
            |items: &[Vec<u8>]| Token::Array(items.iter().cloned().map(Token::Bytes).collect());
        abi::encode(&[
            bytes_array(&self.messages),
            bytes_array(&self.signatures),
            Token::Array(self.symbols.iter().cloned().map(Token::String).collect()),
            Token::Uint(self.vault_delta),
            Token::Bool(self.is_increase),
            Token::Uint(self.nonce),
        ])
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let tokens = abi::decode(&Self::layout(), data)?;
        let [messages, signatures, symbols, vault_delta, is_increase, nonce]: [Token; 6] = tokens
            .try_into()
            .map_err(|_| ReportError::Decode("expected 6 envelope fields".to_string()))?;

        Ok(Self {
            messages: bytes_items(messages)?,
            signatures: bytes_items(signatures)?,
            symbols: match symbols {
                Token::Array(items) => items
                    .into_iter()
                    .map(|t| t.into_string().ok_or_else(|| bad_field("symbols")))
                    .collect::<Result<_>>()?,
                _ => return Err(bad_field("symbols")),
            },
            vault_delta: vault_delta.into_uint().ok_or_else(|| bad_field("vaultDelta"))?,
            is_increase: is_increase.into_bool().ok_or_else(|| bad_field("isIncrease"))?,
            nonce: nonce.into_uint().ok_or_else(|| bad_field("nonce"))?,
        })
    }

    /// Human-readable view with hex-encoded byte fields
    pub fn to_json(&self) -> Value {
        let hex_all = |items: &[Vec<u8>]| {
            items
                .iter()
                .map(|b| format!("0x{}", hex::encode(b)))
                .collect::<Vec<_>>()
        };
        json!({
            "messages": hex_all(&self.messages),
            "signatures": hex_all(&self.signatures),
            "symbols": self.symbols,
            "vaultDelta": self.vault_delta.to_string(),
            "isIncrease": self.is_increase,
            "nonce": self.nonce.to_string(),
        })
    }
}

fn bad_field(name: &str) -> ReportError {
    ReportError::Decode(format!("bad envelope field {}", name))
}

fn bytes_items(token: Token) -> Result<Vec<Vec<u8>>> {
    match token {
        Token::Array(items) => items
            .into_iter()
            .map(|t| t.into_bytes().ok_or_else(|| bad_field("bytes[]")))
            .collect(),
        _ => Err(bad_field("bytes[]")),
    }
}

/// A finished report: the envelope, its per-observation signatures,
/// and the signed envelope ready for submission
#[derive(Debug, Clone)]
pub struct SignedReport {
    pub envelope: ReportEnvelope,
    pub inner: Vec<SignedMessage>,
    pub outer: SignedMessage,
}

impl SignedReport {
    /// `(message, signature)` arguments for `Kaptain.steer`
    pub fn submission(&self) -> (&[u8], &[u8]) {
        (&self.outer.message, &self.outer.signature)
    }
}

/// Orchestrates encoding and signing of a report
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    registry: Arc<AdapterRegistry>,
    signer: MessageSigner,
}

impl ReportBuilder {
    pub fn new(registry: Arc<AdapterRegistry>, signer: MessageSigner) -> Self {
        Self { registry, signer }
    }

    pub fn signer(&self) -> &MessageSigner {
        &self.signer
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Stage 1: encode and sign each observation, in order.
    ///
    /// Returns the adapted keys for the envelope's `symbols` alongside the
    /// signed messages, index for index.
    pub fn sign_observations(
        &self,
        observations: &[Observation],
    ) -> Result<(Vec<String>, Vec<SignedMessage>)> {
        let (symbols, messages): (Vec<_>, Vec<_>) =
            encode_observations(&self.registry, observations)?
                .into_iter()
                .map(|e| (e.symbol, e.message))
                .unzip();
        Ok((symbols, self.signer.sign(messages)?))
    }

    /// Stage 2: wrap signed observations into an envelope
    pub fn assemble(
        &self,
        symbols: Vec<String>,
        inner: &[SignedMessage],
        replay_counter: U256,
        params: ReportParams,
    ) -> Result<ReportEnvelope> {
        let nonce = replay_counter
            .checked_add(U256::one())
            .ok_or(ReportError::NonceOverflow)?;

        Ok(ReportEnvelope {
            messages: inner.iter().map(|s| s.message.clone()).collect(),
            signatures: inner.iter().map(|s| s.signature.clone()).collect(),
            symbols,
            vault_delta: params.vault_delta,
            is_increase: params.is_increase,
            nonce,
        })
    }

    /// Stage 3: sign the encoded envelope
    pub fn seal(&self, envelope: ReportEnvelope, inner: Vec<SignedMessage>) -> Result<SignedReport> {
        let outer = self.signer.sign_message(envelope.abi_encode())?;

        info!(
            nonce = %envelope.nonce,
            observations = envelope.messages.len(),
            symbols = ?envelope.symbols,
            signatory = %format!("{:#x}", outer.signatory),
            "Report signed"
        );

        Ok(SignedReport {
            envelope,
            inner,
            outer,
        })
    }

    /// Build a report against an already-read replay counter.
    ///
    /// Calling this twice with the same counter produces two envelopes with
    /// the same nonce; only one of them will be accepted on-chain.
    pub fn build_report(
        &self,
        observations: &[Observation],
        replay_counter: U256,
        params: ReportParams,
    ) -> Result<SignedReport> {
        let (symbols, inner) = self.sign_observations(observations)?;
        let envelope = self.assemble(symbols, &inner, replay_counter, params)?;
        self.seal(envelope, inner)
    }

    /// Build a report, reading the replay counter from chain state after the
    /// observations are signed and right before the envelope is assembled.
    pub async fn build_report_with<S>(
        &self,
        observations: &[Observation],
        source: &S,
        params: ReportParams,
    ) -> Result<SignedReport>
    where
        S: ReplayCounterSource + ?Sized,
    {
        let (symbols, inner) = self.sign_observations(observations)?;
        let replay_counter = source.fetch_replay_counter().await?;
        debug!(replay_counter = %replay_counter, "Fetched reporter nonce");
        let envelope = self.assemble(symbols, &inner, replay_counter, params)?;
        self.seal(envelope, inner)
    }
}

/// One-shot report build from a raw private key
pub fn build_report(
    registry: Arc<AdapterRegistry>,
    observations: &[Observation],
    replay_counter: U256,
    private_key: &[u8],
    params: ReportParams,
) -> Result<SignedReport> {
    let signer = MessageSigner::from_bytes(private_key)?;
    ReportBuilder::new(registry, signer).build_report(observations, replay_counter, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::recover_signatory;
    use crate::types::PRICES_KIND;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn builder() -> ReportBuilder {
        ReportBuilder::new(
            Arc::new(AdapterRegistry::with_defaults()),
            MessageSigner::from_hex(KEY).unwrap(),
        )
    }

    fn prices() -> Vec<Observation> {
        Observation::from_pairs(PRICES_KIND, 1_700_000_000, vec![("KINE", 2.8), ("ETH", 1800.25)])
            .unwrap()
    }

    #[test]
    fn test_nonce_is_counter_plus_one() {
        let report = builder()
            .build_report(&prices(), U256::from(5), ReportParams::default())
            .unwrap();
        assert_eq!(report.envelope.nonce, U256::from(6));
    }

    #[test]
    fn test_stale_counter_repeats_nonce() {
        let b = builder();
        let first = b
            .build_report(&prices(), U256::from(9), ReportParams::default())
            .unwrap();
        let second = b
            .build_report(&prices(), U256::from(9), ReportParams::default())
            .unwrap();
        assert_eq!(first.envelope.nonce, second.envelope.nonce);
    }

    #[test]
    fn test_nonce_overflow() {
        let err = builder()
            .build_report(&prices(), U256::MAX, ReportParams::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::NonceOverflow));
    }

    #[test]
    fn test_envelope_round_trip_and_params_pass_through() {
        let params = ReportParams {
            vault_delta: U256::from(1_000_000_000_000_000_000u64),
            is_increase: true,
        };
        let report = builder()
            .build_report(&prices(), U256::zero(), params)
            .unwrap();

        let decoded = ReportEnvelope::decode(&report.outer.message).unwrap();
        assert_eq!(decoded, report.envelope);
        assert_eq!(decoded.vault_delta, params.vault_delta);
        assert!(decoded.is_increase);
        assert_eq!(decoded.symbols, vec!["KINE", "ETH"]);
    }

    #[test]
    fn test_signatures_index_matches_messages() {
        let b = builder();
        let report = b
            .build_report(&prices(), U256::zero(), ReportParams::default())
            .unwrap();
        for (message, signature) in report
            .envelope
            .messages
            .iter()
            .zip(&report.envelope.signatures)
        {
            assert_eq!(
                recover_signatory(message, signature).unwrap(),
                b.signer().address()
            );
        }
        let decoded = b.registry().decode(&report.envelope.messages[1]).unwrap();
        assert_eq!(decoded.key.to_string(), "ETH");
    }

    #[test]
    fn test_symbols_match_signed_keys() {
        let observations =
            Observation::from_pairs(PRICES_KIND, 1, vec![("kine", 2.8), ("Eth", 1800.25)]).unwrap();
        let b = builder();
        let report = b
            .build_report(&observations, U256::zero(), ReportParams::default())
            .unwrap();
        assert_eq!(report.envelope.symbols, vec!["KINE", "ETH"]);
        for (symbol, message) in report.envelope.symbols.iter().zip(&report.envelope.messages) {
            assert_eq!(&b.registry().decode(message).unwrap().key.to_string(), symbol);
        }
    }

    #[test]
    fn test_case_colliding_keys_produce_no_report() {
        let observations =
            Observation::from_pairs(PRICES_KIND, 1, vec![("kine", 2.8), ("KINE", 9.9)]).unwrap();
        let err = builder()
            .build_report(&observations, U256::zero(), ReportParams::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::DuplicateKey(k) if k == "KINE"));
    }

    #[test]
    fn test_free_build_report_rejects_bad_key() {
        let err = build_report(
            Arc::new(AdapterRegistry::with_defaults()),
            &prices(),
            U256::zero(),
            &[0u8; 12],
            ReportParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_build_with_source_reads_counter_once() {
        let mut source = MockReplayCounterSource::new();
        source
            .expect_fetch_replay_counter()
            .times(1)
            .returning(|| Ok(U256::from(41)));

        let report = builder()
            .build_report_with(&prices(), &source, ReportParams::default())
            .await
            .unwrap();
        assert_eq!(report.envelope.nonce, U256::from(42));
    }

    #[tokio::test]
    async fn test_failed_encoding_never_reads_counter() {
        let mut source = MockReplayCounterSource::new();
        source.expect_fetch_replay_counter().times(0);

        let observations = vec![Observation::new("bogus", 1, "KINE", 2.8)];
        let err = builder()
            .build_report_with(&observations, &source, ReportParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::UnknownKind(_)));
    }

    #[tokio::test]
    async fn test_nonce_fetch_failure_propagates() {
        let mut source = MockReplayCounterSource::new();
        source
            .expect_fetch_replay_counter()
            .returning(|| Err(ReportError::NonceFetchFailure("rpc down".to_string())));

        let err = builder()
            .build_report_with(&prices(), &source, ReportParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NonceFetchFailure(_)));
    }
}
