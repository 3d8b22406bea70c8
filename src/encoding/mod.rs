//! Observation encoding
//!
//! - Type adapters mapping abstract value types to ABI wire types
//! - Per-kind adapter registry
//! - Canonical ABI codec for single observations

pub mod adapters;
pub mod codec;

pub use adapters::{
    AdapterRegistry, DecimalAdapter, KindAdapters, SymbolAdapter, TypeAdapter, DECIMAL_PLACES,
};
pub use codec::{
    decode_message, encode, encode_message, encode_observation, encode_observations, DecodedMessage,
    EncodedObservation,
};
