//! Canonical ABI encoding of single observations.
//!
//! Layout: `abi.encode(string kind, uint64 timestamp, K key, V value)` with
//! K and V the wire types of the kind's adapters. This is what the Kaptain
//! contract decodes on its message path, so it is fixed bit-for-bit.

use ethers::abi::{self, ParamType, Token};
use ethers::types::U256;
use std::collections::HashSet;

use super::adapters::AdapterRegistry;
use crate::error::{ReportError, Result};
use crate::types::{Observation, ObservationValue, WireType, WireValue};

/// Pack already-adapted fields into the observation layout
pub fn encode_message(kind: &str, timestamp: u64, key: WireValue, value: WireValue) -> Vec<u8> {
    abi::encode(&[
        Token::String(kind.to_string()),
        Token::Uint(U256::from(timestamp)),
        key.into_token(),
        value.into_token(),
    ])
}

/// Encode a single observation using the adapters registered for its kind
pub fn encode_observation(registry: &AdapterRegistry, observation: &Observation) -> Result<Vec<u8>> {
    let adapters = registry.resolve(&observation.kind)?;
    let (key, value) = adapters.encode_pair(&observation.key, &observation.value)?;
    Ok(encode_message(
        &observation.kind,
        observation.timestamp,
        key,
        value,
    ))
}

/// An encoded observation and the adapted key it is listed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedObservation {
    pub symbol: String,
    pub message: Vec<u8>,
}

/// Encode observations in order.
///
/// Keys are compared after the key adapter runs, so `kine` and `KINE`
/// collide under the symbol adapter.
pub fn encode_observations(
    registry: &AdapterRegistry,
    observations: &[Observation],
) -> Result<Vec<EncodedObservation>> {
    let mut seen: HashSet<(&str, WireValue)> = HashSet::new();
    let mut encoded = Vec::with_capacity(observations.len());
    for observation in observations {
        let adapters = registry.resolve(&observation.kind)?;
        let (key, value) = adapters.encode_pair(&observation.key, &observation.value)?;
        if !seen.insert((observation.kind.as_str(), key.clone())) {
            return Err(ReportError::DuplicateKey(key.to_string()));
        }
        encoded.push(EncodedObservation {
            symbol: key.to_string(),
            message: encode_message(&observation.kind, observation.timestamp, key, value),
        });
    }
    Ok(encoded)
}

/// Encode a batch of (key, value) pairs of one kind.
///
/// Output order follows input order, so an insertion-ordered map keeps its
/// order. Keys must be unique. Either every pair encodes or an error is
/// returned.
pub fn encode<K, V>(
    registry: &AdapterRegistry,
    kind: &str,
    timestamp: u64,
    pairs: impl IntoIterator<Item = (K, V)>,
) -> Result<Vec<Vec<u8>>>
where
    K: Into<String>,
    V: Into<ObservationValue>,
{
    // resolve before touching pairs so an unknown kind fails even for empty input
    registry.resolve(kind)?;
    let observations = Observation::from_pairs(kind, timestamp, pairs)?;
    let messages: Vec<Vec<u8>> = encode_observations(registry, &observations)?
        .into_iter()
        .map(|e| e.message)
        .collect();

    tracing::debug!(kind = kind, count = messages.len(), "Encoded observations");
    Ok(messages)
}

/// Fields recovered from an encoded observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub kind: String,
    pub timestamp: u64,
    pub key: WireValue,
    pub value: WireValue,
}

/// Decode an observation given only its declared key and value wire types
pub fn decode_message(
    data: &[u8],
    key_type: WireType,
    value_type: WireType,
) -> Result<DecodedMessage> {
    let tokens = abi::decode(
        &[
            ParamType::String,
            ParamType::Uint(64),
            key_type.param_type(),
            value_type.param_type(),
        ],
        data,
    )?;

    let [kind, timestamp, key, value]: [Token; 4] = tokens
        .try_into()
        .map_err(|_| ReportError::Decode("expected 4 fields".to_string()))?;

    let kind = match kind {
        Token::String(s) => s,
        other => return Err(ReportError::Decode(format!("bad kind field {:?}", other))),
    };
    let timestamp = match WireValue::from_token(timestamp, WireType::Uint64)? {
        WireValue::Uint64(ts) => ts,
        other => {
            return Err(ReportError::Decode(format!(
                "bad timestamp field {:?}",
                other
            )))
        }
    };

    Ok(DecodedMessage {
        kind,
        timestamp,
        key: WireValue::from_token(key, key_type)?,
        value: WireValue::from_token(value, value_type)?,
    })
}

impl AdapterRegistry {
    /// Decode an observation, reading its kind first to pick the wire types
    pub fn decode(&self, data: &[u8]) -> Result<DecodedMessage> {
        let kind = match abi::decode(&[ParamType::String], data)?.pop() {
            Some(Token::String(kind)) => kind,
            _ => return Err(ReportError::Decode("missing kind field".to_string())),
        };
        let adapters = self.resolve(&kind)?;
        decode_message(data, adapters.key.wire_type(), adapters.value.wire_type())
    }
}
