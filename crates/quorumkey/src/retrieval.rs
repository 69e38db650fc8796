//! share retrieval and key reconstruction
//!
//! shares are requested only from nodes whose commitment signature went
//! into the request. each share arrives encrypted to the session key; once
//! `t` decrypt, the key is interpolated and checked against the public key
//! the lookup quorum agreed on. a mismatch means at least one share is bad,
//! so threshold-sized subsets are tried before giving up.

use k256::{ProjectivePoint, Scalar};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::client::Client;
use crate::config::NodeEndpoint;
use crate::crypto::EphemeralKeyPair;
use crate::curve::{pad_hex64, point_from_coordinates, scalar_to_hex, scalar_to_point};
use crate::metadata::MetadataService;
use crate::quorum::{broadcast, next_before};
use crate::rpc::{EncryptedShare, NodeRpc, ShareRequest};
use crate::vss::{combinations, interpolate_at_zero, Share};
use crate::{Error, Result};

/// a reconstructed key, before any nonce tweak
pub struct Reconstruction {
    pub pub_key_x: String,
    pub pub_key_y: String,
    secret: Zeroizing<Scalar>,
}

impl Reconstruction {
    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(scalar_to_hex(&self.secret))
    }
}

impl std::fmt::Debug for Reconstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconstruction")
            .field("pub_key_x", &self.pub_key_x)
            .field("pub_key_y", &self.pub_key_y)
            .finish_non_exhaustive()
    }
}

/// upper bound on threshold subsets tried per reconstruction attempt
const MAX_SUBSETS: usize = 1024;

/// interpolate `shares`, falling back to threshold subsets, until `secret·G == target`
fn reconstruct_matching(
    shares: &[Share],
    target: &ProjectivePoint,
    threshold: usize,
) -> Option<Zeroizing<Scalar>> {
    let recover = |picked: &[Share]| -> Option<Zeroizing<Scalar>> {
        let secret = Zeroizing::new(interpolate_at_zero(picked).ok()?);
        (scalar_to_point(&secret) == *target).then_some(secret)
    };

    if let Some(secret) = recover(shares) {
        return Some(secret);
    }
    if shares.len() <= threshold {
        return None;
    }
    combinations(shares.len(), threshold)
        .take(MAX_SUBSETS)
        .find_map(|subset| {
            let picked: Vec<Share> = subset.iter().map(|&i| shares[i].clone()).collect();
            recover(&picked)
        })
}

impl<R: NodeRpc, M: MetadataService> Client<R, M> {
    /// fetch shares from the signing nodes and rebuild the key for `(pub_key_x, pub_key_y)`
    pub async fn retrieve_and_reconstruct(
        &self,
        request: &ShareRequest,
        pub_key_x: &str,
        pub_key_y: &str,
        session: &EphemeralKeyPair,
    ) -> Result<Reconstruction> {
        let threshold = self.config.threshold;
        let x = pad_hex64(pub_key_x)?;
        let y = pad_hex64(pub_key_y)?;
        let target = point_from_coordinates(&x, &y)?;

        let mut signers: Vec<&NodeEndpoint> = Vec::new();
        for sig in &request.node_signatures {
            if let Some(node) = self.nodes.get(sig.node_index) {
                if !signers.iter().any(|n| n.index == node.index) {
                    signers.push(node);
                }
            }
        }
        if signers.len() < threshold {
            return Err(Error::InsufficientShares {
                have: signers.len(),
                need: threshold,
            });
        }

        let rpc = &self.rpc;
        let mut replies = broadcast(
            signers.iter().copied(),
            self.config.retry,
            "share_request",
            move |node| rpc.share_request(node, request),
        );

        let mut shares: Vec<Share> = Vec::with_capacity(signers.len());
        let mut undecryptable = 0;
        let mut pending = signers.len();

        while let Some((index, reply)) = next_before(&mut replies, None).await {
            pending -= 1;
            match reply.and_then(|enc| self.open_share(index, session, &enc)) {
                Ok(share) => {
                    debug!(node = index, "share received");
                    shares.push(share);
                }
                Err(e @ Error::ShareDecryption(_)) => {
                    warn!(node = index, error = %e, "discarding share");
                    undecryptable += 1;
                }
                Err(e) => warn!(node = index, error = %e, "share request failed"),
            }

            if shares.len() >= threshold {
                if let Some(secret) = reconstruct_matching(&shares, &target, threshold) {
                    debug!(shares = shares.len(), "key reconstructed");
                    return Ok(Reconstruction {
                        pub_key_x: x,
                        pub_key_y: y,
                        secret,
                    });
                }
            }
            if shares.len() + pending < threshold {
                break;
            }
        }

        if shares.len() >= threshold {
            Err(Error::KeyMismatch)
        } else if undecryptable > 0 {
            Err(Error::ShareDecryption(format!(
                "{} of {} shares could not be decrypted",
                undecryptable,
                signers.len()
            )))
        } else {
            Err(Error::InsufficientShares {
                have: shares.len(),
                need: threshold,
            })
        }
    }

    fn open_share(
        &self,
        index: u32,
        session: &EphemeralKeyPair,
        enc: &EncryptedShare,
    ) -> Result<Share> {
        if enc.node_index != index {
            return Err(Error::ShareDecryption(format!(
                "node {} sent a share labelled for node {}",
                index, enc.node_index
            )));
        }
        let value = self.decryptor.decrypt(session, enc)?;
        Ok(Share { index, value })
    }
}
