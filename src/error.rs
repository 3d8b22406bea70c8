//! Error types for report encoding and signing.

use thiserror::Error;

/// Errors raised while encoding, signing or assembling a report.
///
/// Every variant aborts the whole operation: a batch that fails on one
/// observation yields nothing for the observations before it.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown kind of data \"{0}\"")]
    UnknownKind(String),

    #[error("{adapter} adapter rejected value: {reason}")]
    AdapterEncoding {
        adapter: &'static str,
        reason: String,
    },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("failed to fetch reporter nonce: {0}")]
    NonceFetchFailure(String),

    #[error("reporter nonce overflows uint256")]
    NonceOverflow,

    #[error("duplicate observation key \"{0}\"")]
    DuplicateKey(String),

    #[error("invalid adapter registration: {0}")]
    InvalidRegistration(String),

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl ReportError {
    pub(crate) fn adapter(adapter: &'static str, reason: impl Into<String>) -> Self {
        ReportError::AdapterEncoding {
            adapter,
            reason: reason.into(),
        }
    }
}

impl From<ethers::abi::Error> for ReportError {
    fn from(e: ethers::abi::Error) -> Self {
        ReportError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
