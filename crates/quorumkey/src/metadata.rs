//! per-key nonce from the metadata service
//!
//! the nonce is an additive tweak on a user's key. zero means untweaked.

use async_trait::async_trait;
use k256::{elliptic_curve::ops::Reduce, Scalar, U256};

use crate::curve::hex_to_bytes32;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce(U256);

impl Nonce {
    pub const ZERO: Nonce = Nonce(U256::ZERO);

    /// parse a hex integer; an empty string is zero
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::ZERO);
        }
        Ok(Self(U256::from_be_slice(&hex_to_bytes32(s)?)))
    }

    pub fn from_u64(v: u64) -> Self {
        Self(U256::from_u64(v))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == U256::ZERO
    }

    /// nonce mod curve order
    pub fn to_scalar(&self) -> Scalar {
        <Scalar as Reduce<U256>>::reduce(self.0)
    }
}

/// authoritative, idempotent nonce lookup keyed by public key
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn get_nonce(&self, pub_key_x: &str, pub_key_y: &str) -> Result<Nonce>;
}
