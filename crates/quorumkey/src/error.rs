//! error types for quorumkey

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === quorum errors ===
    #[error("nodes unavailable: {reachable} of {total} reachable, need {need}")]
    NodesUnavailable {
        reachable: usize,
        total: usize,
        need: usize,
    },

    #[error("commitment quorum not reached: have {have} valid signatures, need {need}")]
    CommitmentQuorumNotReached { have: usize, need: usize },

    #[error("not enough shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("share decryption failed: {0}")]
    ShareDecryption(String),

    #[error("session timed out after {0:?}")]
    Timeout(Duration),

    #[error("unable to derive key")]
    UnableToDerive,

    // === lookup errors ===
    #[error("verifier id has no key assigned")]
    KeyNotAssigned,

    #[error("nodes disagree on the key for this verifier id")]
    InconsistentLookup,

    #[error("reconstructed key does not match resolved public key")]
    KeyMismatch,

    #[error("invalid signature from node {0}")]
    InvalidSignature(u32),

    // === transport errors ===
    #[error("network error: {0}")]
    Network(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("metadata service error: {0}")]
    Metadata(String),

    // === encoding errors ===
    #[error("invalid curve point")]
    InvalidPoint,

    #[error("invalid scalar")]
    InvalidScalar,

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    // === interpolation errors ===
    #[error("duplicate share index: {0}")]
    DuplicateIndex(u32),

    #[error("share index must be greater than 0")]
    InvalidIndex,

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// whether a single node call failing with this error is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(Error::Network("connection reset".into()).is_transient());
        assert!(!Error::Rpc("bad request".into()).is_transient());
        assert!(!Error::KeyNotAssigned.is_transient());
        assert!(!Error::Timeout(Duration::from_secs(1)).is_transient());
    }
}
