//! Type adapters and the per-kind adapter registry.
//!
//! An adapter turns an abstract observation value ("symbol", "decimal")
//! into the ABI wire value the consuming contract decodes. A kind maps to
//! exactly one (key, value) adapter pair.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ReportError, Result};
use crate::types::{ObservationValue, WireType, WireValue, PRICES_KIND};

/// Fixed-point places the on-chain decimal type carries
pub const DECIMAL_PLACES: u32 = 6;

/// Pure mapping from an observation value to a wire value
pub trait TypeAdapter: Send + Sync + fmt::Debug {
    /// Abstract type name, e.g. "symbol"
    fn name(&self) -> &'static str;

    fn wire_type(&self) -> WireType;

    fn encode(&self, value: &ObservationValue) -> Result<WireValue>;
}

/// `symbol`: upper-cased UTF-8 string
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolAdapter;

impl TypeAdapter for SymbolAdapter {
    fn name(&self) -> &'static str {
        "symbol"
    }

    fn wire_type(&self) -> WireType {
        WireType::String
    }

    fn encode(&self, value: &ObservationValue) -> Result<WireValue> {
        match value {
            ObservationValue::Text(s) => Ok(WireValue::String(s.to_uppercase())),
            other => Err(ReportError::adapter(
                self.name(),
                format!("expected text, got {}", other),
            )),
        }
    }
}

/// `decimal`: non-negative fixed-point number packed as uint64
///
/// The value is scaled by 10^places and rounded half away from zero on its
/// exact decimal representation, so 2.8 encodes as 2_800_000 and
/// 0.0000005 as 1.
#[derive(Debug, Clone, Copy)]
pub struct DecimalAdapter {
    places: u32,
}

impl DecimalAdapter {
    pub fn new(places: u32) -> Self {
        Self { places }
    }

    fn to_decimal(&self, value: &ObservationValue) -> Result<Decimal> {
        match value {
            ObservationValue::Decimal(d) => Ok(*d),
            ObservationValue::Number(n) => {
                if !n.is_finite() {
                    return Err(ReportError::adapter(self.name(), format!("{} is not finite", n)));
                }
                Decimal::try_from(*n)
                    .map_err(|e| ReportError::adapter(self.name(), format!("{}: {}", n, e)))
            }
            ObservationValue::Text(s) => Decimal::from_str(s.trim()).map_err(|_| {
                ReportError::adapter(self.name(), format!("\"{}\" is not numeric", s))
            }),
        }
    }
}

impl Default for DecimalAdapter {
    fn default() -> Self {
        Self::new(DECIMAL_PLACES)
    }
}

impl TypeAdapter for DecimalAdapter {
    fn name(&self) -> &'static str {
        "decimal"
    }

    fn wire_type(&self) -> WireType {
        WireType::Uint64
    }

    fn encode(&self, value: &ObservationValue) -> Result<WireValue> {
        let decimal = self.to_decimal(value)?;
        if decimal.is_sign_negative() && !decimal.is_zero() {
            return Err(ReportError::adapter(
                self.name(),
                format!("{} is negative", decimal),
            ));
        }

        let factor = 10u64.checked_pow(self.places).map(Decimal::from).ok_or_else(|| {
            ReportError::adapter(
                self.name(),
                format!("10^{} does not fit in uint64", self.places),
            )
        })?;
        let scaled = decimal
            .checked_mul(factor)
            .ok_or_else(|| ReportError::adapter(self.name(), format!("{} overflows", decimal)))?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

        scaled.to_u64().map(WireValue::Uint64).ok_or_else(|| {
            ReportError::adapter(self.name(), format!("{} does not fit in uint64", scaled))
        })
    }
}

/// Key and value adapters for one kind
#[derive(Debug, Clone)]
pub struct KindAdapters {
    pub key: Arc<dyn TypeAdapter>,
    pub value: Arc<dyn TypeAdapter>,
}

impl KindAdapters {
    /// Apply both adapters to one (key, value) pair
    pub fn encode_pair(&self, key: &str, value: &ObservationValue) -> Result<(WireValue, WireValue)> {
        let key = self.key.encode(&ObservationValue::Text(key.to_string()))?;
        let value = self.value.encode(value)?;
        Ok((key, value))
    }
}

/// Registry of kind name -> adapter pair
///
/// Built once at startup and read-only afterwards; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    kinds: HashMap<String, KindAdapters>,
}

impl AdapterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Registry with the base `prices` kind: (symbol, decimal)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.kinds.insert(
            PRICES_KIND.to_string(),
            KindAdapters {
                key: Arc::new(SymbolAdapter),
                value: Arc::new(DecimalAdapter::default()),
            },
        );
        registry
    }

    /// Register a new kind. Names must be non-empty and not yet taken.
    pub fn register(
        &mut self,
        kind: &str,
        key: impl TypeAdapter + 'static,
        value: impl TypeAdapter + 'static,
    ) -> Result<()> {
        if kind.trim().is_empty() {
            return Err(ReportError::InvalidRegistration(
                "kind name must not be empty".to_string(),
            ));
        }
        if self.kinds.contains_key(kind) {
            return Err(ReportError::InvalidRegistration(format!(
                "kind \"{}\" is already registered",
                kind
            )));
        }

        tracing::debug!(
            kind = kind,
            key = key.name(),
            value = value.name(),
            "Registered adapter pair"
        );
        self.kinds.insert(
            kind.to_string(),
            KindAdapters {
                key: Arc::new(key),
                value: Arc::new(value),
            },
        );
        Ok(())
    }

    pub fn resolve(&self, kind: &str) -> Result<&KindAdapters> {
        self.kinds
            .get(kind)
            .ok_or_else(|| ReportError::UnknownKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
