//! commitment handshake
//!
//! before any node releases a share, the client broadcasts a commitment to
//! the login token (keccak-256) together with its ephemeral public key.
//! each node signs the canonical message with its static key. a quorum of
//! valid signatures is the authorization for the share request.

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::{NodeEndpoint, NodePublicKey};
use crate::curve::pad_hex64;
use crate::metadata::MetadataService;
use crate::quorum::{broadcast, next_before};
use crate::rpc::{Commitment, NodeRpc, NodeSignature};
use crate::{Error, Result};

/// ecdsa (sha-256) signature over a commitment message, hex `r || s`
pub fn sign_commitment(key: &SigningKey, message: &str) -> String {
    let sig: Signature = key.sign(message.as_bytes());
    hex::encode(sig.to_bytes())
}

/// check a node's commitment signature against its configured key
pub fn verify_commitment_signature(key: &NodePublicKey, message: &str, signature: &str) -> bool {
    let Ok(bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&bytes) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_affine(key.point().to_affine()) else {
        return false;
    };
    vk.verify(message.as_bytes(), &sig).is_ok()
}

/// validate one signature reply against the node it came from
fn check_reply(node: &NodeEndpoint, commitment: &Commitment, reply: &NodeSignature) -> Result<()> {
    if reply.node_index != node.index {
        return Err(Error::InvalidSignature(node.index));
    }
    if reply.data != commitment.message() {
        return Err(Error::InvalidSignature(node.index));
    }
    let echoed = (pad_hex64(&reply.node_pub_x), pad_hex64(&reply.node_pub_y));
    match echoed {
        (Ok(x), Ok(y)) if x == node.public_key.x && y == node.public_key.y => {}
        _ => return Err(Error::InvalidSignature(node.index)),
    }
    if !verify_commitment_signature(&node.public_key, &reply.data, &reply.signature) {
        return Err(Error::InvalidSignature(node.index));
    }
    Ok(())
}

impl<R: NodeRpc, M: MetadataService> Client<R, M> {
    /// collect a quorum of valid node signatures over `commitment`
    ///
    /// returns as soon as the quorum is met; remaining requests are dropped.
    pub async fn request_commitment(&self, commitment: &Commitment) -> Result<Vec<NodeSignature>> {
        let need = self.config.commitment_quorum;
        let deadline = Instant::now() + self.config.commitment_timeout;

        let rpc = &self.rpc;
        let mut replies = broadcast(
            self.nodes.iter(),
            self.config.retry,
            "commitment_request",
            move |node| rpc.commitment_request(node, commitment),
        );

        let mut signatures = Vec::with_capacity(need);
        while let Some((index, reply)) = next_before(&mut replies, Some(deadline)).await {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            let checked = reply.and_then(|sig| check_reply(node, commitment, &sig).map(|_| sig));
            match checked {
                Ok(sig) => {
                    debug!(node = index, "commitment signed");
                    signatures.push(sig);
                    if signatures.len() >= need {
                        return Ok(signatures);
                    }
                }
                Err(e) => warn!(node = index, error = %e, "commitment rejected"),
            }
        }

        Err(Error::CommitmentQuorumNotReached {
            have: signatures.len(),
            need,
        })
    }
}
