//! Kine Reporter Library
//!
//! Builds signed price reports for the Kaptain aggregator contract

pub mod chain;
pub mod config;
pub mod encoding;
pub mod error;
pub mod report;
pub mod signing;
pub mod types;

pub use error::{ReportError, Result};
pub use report::{ReplayCounterSource, ReportBuilder, ReportEnvelope, ReportParams, SignedReport};
pub use signing::{MessageSigner, SignedMessage};
pub use types::{Observation, ObservationValue, WireType, WireValue};
