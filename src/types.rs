//! Core types used throughout the reporter
//!
//! Defines observations, their opaque values, and the ABI wire types
//! those values are packed as.

use ethers::abi::{ParamType, Token};
use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReportError, Result};

/// Kind name for price observations
pub const PRICES_KIND: &str = "prices";

/// Adapter-specific observation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Decimal(Decimal),
    Number(f64),
    Text(String),
}

impl From<&str> for ObservationValue {
    fn from(s: &str) -> Self {
        ObservationValue::Text(s.to_string())
    }
}

impl From<String> for ObservationValue {
    fn from(s: String) -> Self {
        ObservationValue::Text(s)
    }
}

impl From<f64> for ObservationValue {
    fn from(n: f64) -> Self {
        ObservationValue::Number(n)
    }
}

impl From<Decimal> for ObservationValue {
    fn from(d: Decimal) -> Self {
        ObservationValue::Decimal(d)
    }
}

impl fmt::Display for ObservationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationValue::Decimal(d) => write!(f, "{}", d),
            ObservationValue::Number(n) => write!(f, "{}", n),
            ObservationValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A single observed datum, e.g. one asset price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Selects the adapter pair
    pub kind: String,
    /// Seconds since epoch
    pub timestamp: u64,
    pub key: String,
    pub value: ObservationValue,
}

impl Observation {
    pub fn new(
        kind: impl Into<String>,
        timestamp: u64,
        key: impl Into<String>,
        value: impl Into<ObservationValue>,
    ) -> Self {
        Self {
            kind: kind.into(),
            timestamp,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Price observation with the current wall-clock timestamp
    pub fn price(symbol: impl Into<String>, price: impl Into<ObservationValue>) -> Self {
        Self::new(PRICES_KIND, now_secs(), symbol, price)
    }

    /// Build one observation per pair, preserving pair order.
    ///
    /// Keys must be unique within the batch.
    pub fn from_pairs<K, V>(
        kind: &str,
        timestamp: u64,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Vec<Self>>
    where
        K: Into<String>,
        V: Into<ObservationValue>,
    {
        let mut out: Vec<Self> = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            if out.iter().any(|o| o.key == key) {
                return Err(ReportError::DuplicateKey(key));
            }
            out.push(Self::new(kind, timestamp, key, value));
        }
        Ok(out)
    }
}

/// Current unix time in seconds
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// ABI primitive an adapter packs its output as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    String,
    Uint64,
}

impl WireType {
    pub fn param_type(&self) -> ParamType {
        match self {
            WireType::String => ParamType::String,
            WireType::Uint64 => ParamType::Uint(64),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireType::String => write!(f, "string"),
            WireType::Uint64 => write!(f, "uint64"),
        }
    }
}

/// Adapter output, ready to be ABI-packed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireValue {
    String(String),
    Uint64(u64),
}

impl WireValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::String(_) => WireType::String,
            WireValue::Uint64(_) => WireType::Uint64,
        }
    }

    pub fn into_token(self) -> Token {
        match self {
            WireValue::String(s) => Token::String(s),
            WireValue::Uint64(n) => Token::Uint(U256::from(n)),
        }
    }

    /// Convert a decoded token back, checking it against the declared type
    pub fn from_token(token: Token, wire_type: WireType) -> Result<Self> {
        match (wire_type, token) {
            (WireType::String, Token::String(s)) => Ok(WireValue::String(s)),
            (WireType::Uint64, Token::Uint(n)) => {
                if n > U256::from(u64::MAX) {
                    return Err(ReportError::Decode(format!("{} exceeds uint64", n)));
                }
                Ok(WireValue::Uint64(n.as_u64()))
            }
            (wire_type, token) => Err(ReportError::Decode(format!(
                "expected {} but found {:?}",
                wire_type, token
            ))),
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::String(s) => write!(f, "{}", s),
            WireValue::Uint64(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_preserves_order() {
        let obs = Observation::from_pairs(PRICES_KIND, 10, vec![("KINE", 2.8), ("ETH", 1.5)])
            .unwrap();
        let keys: Vec<&str> = obs.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["KINE", "ETH"]);
        assert!(obs.iter().all(|o| o.timestamp == 10 && o.kind == PRICES_KIND));
    }

    #[test]
    fn test_from_pairs_rejects_duplicate_keys() {
        let err = Observation::from_pairs(PRICES_KIND, 10, vec![("KINE", 2.8), ("KINE", 3.0)])
            .unwrap_err();
        assert!(matches!(err, ReportError::DuplicateKey(k) if k == "KINE"));
    }

    #[test]
    fn test_wire_value_rejects_mismatched_token() {
        let err = WireValue::from_token(Token::Bool(true), WireType::Uint64).unwrap_err();
        assert!(matches!(err, ReportError::Decode(_)));
    }

    #[test]
    fn test_wire_value_rejects_wide_uint() {
        let token = Token::Uint(U256::from(u64::MAX) + U256::one());
        assert!(WireValue::from_token(token, WireType::Uint64).is_err());
    }
}
