//! node rpc capability and its message types
//!
//! the protocol only needs four calls from a custodian node. transports
//! (http json-rpc, the in-memory network) implement [`NodeRpc`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NodeEndpoint;
use crate::Result;

/// a public key as reported by a node lookup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupKey {
    #[serde(rename = "pub_key_X")]
    pub pub_key_x: String,
    #[serde(rename = "pub_key_Y")]
    pub pub_key_y: String,
    /// address as computed by the node (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// one node's answer to a key lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupReply {
    Found(LookupKey),
    /// identity not provisioned yet (distinct from a transport failure)
    NotFound,
}

/// token commitment broadcast before shares are released
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub verifier: String,
    /// keccak-256 of the login token, hex
    pub token_commitment: String,
    /// ephemeral public key x, padded hex
    pub temp_pub_x: String,
    /// ephemeral public key y, padded hex
    pub temp_pub_y: String,
    /// unix seconds
    pub timestamp: u64,
}

impl Commitment {
    /// prefix binding signatures to this protocol
    pub const PREFIX: &'static str = "mug00";

    /// canonical signed message, fields separated by 0x1c
    pub fn message(&self) -> String {
        [
            Self::PREFIX,
            &self.token_commitment,
            &self.temp_pub_x,
            &self.temp_pub_y,
            &self.timestamp.to_string(),
            &self.verifier,
        ]
        .join("\u{1c}")
    }
}

/// a node's signed acknowledgement of a commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    pub node_index: u32,
    /// the message the node signed
    pub data: String,
    /// 64-byte `r || s`, hex
    pub signature: String,
    #[serde(rename = "nodepubx")]
    pub node_pub_x: String,
    #[serde(rename = "nodepuby")]
    pub node_pub_y: String,
}

/// share release request, authorised by a quorum of commitment signatures
#[derive(Clone, Serialize, Deserialize)]
pub struct ShareRequest {
    pub verifier: String,
    pub verifier_id: String,
    /// raw login token; nodes check it against the commitment they signed
    pub id_token: String,
    pub node_signatures: Vec<NodeSignature>,
    /// caller supplied fields merged into the request
    #[serde(default)]
    pub extra_params: serde_json::Value,
}

impl std::fmt::Debug for ShareRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareRequest")
            .field("verifier", &self.verifier)
            .field("verifier_id", &self.verifier_id)
            .field("node_signatures", &self.node_signatures.len())
            .finish_non_exhaustive()
    }
}

/// a node's key share, encrypted to the session's ephemeral key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShare {
    pub node_index: u32,
    /// sender's one-time SEC1 public key
    #[serde(with = "hex_bytes")]
    pub sender_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
}

/// custodian node calls used by the protocol
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn key_lookup(
        &self,
        node: &NodeEndpoint,
        verifier: &str,
        verifier_id: &str,
    ) -> Result<LookupReply>;

    async fn key_assign(&self, node: &NodeEndpoint, verifier: &str, verifier_id: &str)
        -> Result<()>;

    async fn commitment_request(
        &self,
        node: &NodeEndpoint,
        commitment: &Commitment,
    ) -> Result<NodeSignature>;

    async fn share_request(
        &self,
        node: &NodeEndpoint,
        request: &ShareRequest,
    ) -> Result<EncryptedShare>;
}

/// hex serialization helper for serde
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_message_binds_every_field() {
        let c = Commitment {
            verifier: "google".into(),
            token_commitment: "ab".into(),
            temp_pub_x: "01".into(),
            temp_pub_y: "02".into(),
            timestamp: 1_700_000_000,
        };
        assert_eq!(c.message(), "mug00\u{1c}ab\u{1c}01\u{1c}02\u{1c}1700000000\u{1c}google");

        let mut other = c.clone();
        other.timestamp += 1;
        assert_ne!(c.message(), other.message());
    }

    #[test]
    fn test_lookup_key_wire_names() {
        let key: LookupKey =
            serde_json::from_str(r#"{"pub_key_X":"aa","pub_key_Y":"bb"}"#).unwrap();
        assert_eq!(key.pub_key_x, "aa");
        assert_eq!(key.address, None);
    }

    #[test]
    fn test_share_request_debug_hides_token() {
        let req = ShareRequest {
            verifier: "google".into(),
            verifier_id: "alice@example.com".into(),
            id_token: "secret-token".into(),
            node_signatures: vec![],
            extra_params: serde_json::Value::Null,
        };
        assert!(!format!("{:?}", req).contains("secret-token"));
    }
}
