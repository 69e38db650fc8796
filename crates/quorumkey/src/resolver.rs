//! public address resolution
//!
//! # flow
//! 1. look the verifier id up on every node, quorum-counting the replies
//! 2. if a quorum says "not assigned", ask one node to assign a key, look up again
//! 3. fetch the key's nonce from the metadata service
//! 4. address = addr(P) when the nonce is zero, addr(P + nonce·G) otherwise

use k256::ProjectivePoint;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::curve::{
    combine_points, pad_hex64, point_from_coordinates, public_key_to_address, scalar_to_point,
};
use crate::metadata::{MetadataService, Nonce};
use crate::quorum::{broadcast, next_before, with_retries};
use crate::rpc::{LookupKey, LookupReply, NodeRpc};
use crate::{Error, Result};

/// resolved identity; key coordinates only present for extended lookups
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    #[serde(rename = "pub_key_X", skip_serializing_if = "Option::is_none")]
    pub pub_key_x: Option<String>,
    #[serde(rename = "pub_key_Y", skip_serializing_if = "Option::is_none")]
    pub pub_key_y: Option<String>,
    pub address: String,
}

/// address of `key` after applying the nonce tweak
pub fn tweaked_address(key: &ProjectivePoint, nonce: &Nonce) -> Result<String> {
    if nonce.is_zero() {
        return public_key_to_address(key);
    }
    let tweak = scalar_to_point(&nonce.to_scalar());
    public_key_to_address(&combine_points(&[*key, tweak]))
}

impl<R: NodeRpc, M: MetadataService> Client<R, M> {
    /// resolve (provisioning on first use) the address of a verifier id
    pub async fn resolve_public_address(
        &self,
        verifier: &str,
        verifier_id: &str,
        extended: bool,
    ) -> Result<LookupResult> {
        let key = match self.lookup_key(verifier, verifier_id).await? {
            Some(key) => key,
            None => {
                info!(verifier, "no key assigned yet, requesting assignment");
                self.assign_key(verifier, verifier_id).await?;
                self.lookup_key(verifier, verifier_id)
                    .await?
                    .ok_or(Error::KeyNotAssigned)?
            }
        };

        let x = pad_hex64(&key.pub_key_x)?;
        let y = pad_hex64(&key.pub_key_y)?;
        let point = point_from_coordinates(&x, &y)?;

        let nonce = self.fetch_nonce(&x, &y).await?;
        let address = tweaked_address(&point, &nonce)?;

        if nonce.is_zero() {
            if let Some(reported) = &key.address {
                if !reported.eq_ignore_ascii_case(&address) {
                    warn!(
                        verifier,
                        %reported,
                        derived = %address,
                        "node reported a different address"
                    );
                }
            }
        }
        debug!(verifier, %address, tweaked = !nonce.is_zero(), "resolved public address");

        Ok(if extended {
            LookupResult {
                pub_key_x: Some(x),
                pub_key_y: Some(y),
                address,
            }
        } else {
            LookupResult {
                pub_key_x: None,
                pub_key_y: None,
                address,
            }
        })
    }

    /// nonce for a public key, retried like any node call
    pub(crate) async fn fetch_nonce(&self, x: &str, y: &str) -> Result<Nonce> {
        with_retries(self.config.retry, 0, "get_nonce", || self.metadata.get_nonce(x, y)).await
    }

    /// quorum lookup; `None` when a quorum reports the id as unassigned
    async fn lookup_key(&self, verifier: &str, verifier_id: &str) -> Result<Option<LookupKey>> {
        let total = self.nodes.len();
        let need = self.config.lookup_quorum;

        let rpc = &self.rpc;
        let mut replies = broadcast(
            self.nodes.iter(),
            self.config.retry,
            "key_lookup",
            move |node| rpc.key_lookup(node, verifier, verifier_id),
        );

        // votes per distinct (x, y)
        let mut found: Vec<((String, String), usize)> = Vec::new();
        let mut not_found = 0;
        let mut unreachable = 0;
        let mut rejected: Option<Error> = None;
        let mut pending = total;

        while let Some((index, reply)) = next_before(&mut replies, None).await {
            pending -= 1;
            match reply {
                Ok(LookupReply::Found(key)) => {
                    match (pad_hex64(&key.pub_key_x), pad_hex64(&key.pub_key_y)) {
                        (Ok(x), Ok(y)) => {
                            let id = (x, y);
                            let votes = match found.iter_mut().find(|(k, _)| *k == id) {
                                Some(entry) => {
                                    entry.1 += 1;
                                    entry.1
                                }
                                None => {
                                    found.push((id, 1));
                                    1
                                }
                            };
                            if votes >= need {
                                return Ok(Some(key));
                            }
                        }
                        (Err(e), _) | (_, Err(e)) => {
                            warn!(node = index, error = %e, "lookup returned malformed key");
                            rejected = Some(e);
                        }
                    }
                }
                Ok(LookupReply::NotFound) => {
                    not_found += 1;
                    if not_found >= need {
                        return Ok(None);
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(node = index, error = %e, "node unreachable for lookup");
                    unreachable += 1;
                }
                Err(e) => {
                    warn!(node = index, error = %e, "key lookup rejected");
                    rejected = Some(e);
                }
            }

            let best = found.iter().map(|(_, v)| *v).max().unwrap_or(0).max(not_found);
            if best + pending < need {
                break;
            }
        }

        let reachable = total - unreachable;
        let answered = found.iter().map(|(_, v)| *v).sum::<usize>() + not_found;
        match rejected {
            _ if reachable < need => Err(Error::NodesUnavailable {
                reachable,
                total,
                need,
            }),
            // too few usable answers because nodes turned the lookup down
            Some(e) if answered < need => Err(e),
            _ => Err(Error::InconsistentLookup),
        }
    }

    /// ask nodes one at a time, from a random start, until one assigns a key
    async fn assign_key(&self, verifier: &str, verifier_id: &str) -> Result<()> {
        let nodes: Vec<_> = self.nodes.iter().collect();
        let start = rand::thread_rng().gen_range(0..nodes.len());
        let mut rejected: Option<Error> = None;

        for offset in 0..nodes.len() {
            let node = nodes[(start + offset) % nodes.len()];
            let assigned = with_retries(self.config.retry, node.index, "key_assign", || {
                self.rpc.key_assign(node, verifier, verifier_id)
            })
            .await;
            match assigned {
                Ok(()) => {
                    info!(node = node.index, verifier, "key assigned");
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(node = node.index, error = %e, "node unreachable for assignment")
                }
                Err(e) => {
                    warn!(node = node.index, error = %e, "key assignment rejected");
                    rejected = Some(e);
                }
            }
        }

        // a node that answered with a refusal outranks the ones that never answered
        match rejected {
            Some(e) => Err(e),
            None => Err(Error::NodesUnavailable {
                reachable: 0,
                total: nodes.len(),
                need: 1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::Scalar;

    #[test]
    fn test_zero_nonce_is_neutral() {
        let p = scalar_to_point(&Scalar::from(99u64));
        assert_eq!(
            tweaked_address(&p, &Nonce::ZERO).unwrap(),
            public_key_to_address(&p).unwrap()
        );
    }

    #[test]
    fn test_nonce_tweak_is_additive() {
        let p = scalar_to_point(&Scalar::from(99u64));
        let tweaked = tweaked_address(&p, &Nonce::from_u64(12345)).unwrap();
        let expected =
            public_key_to_address(&scalar_to_point(&Scalar::from(99u64 + 12345))).unwrap();
        assert_eq!(tweaked, expected);
        assert_ne!(tweaked, public_key_to_address(&p).unwrap());
    }

    #[test]
    fn test_lookup_result_shape() {
        let short = LookupResult {
            pub_key_x: None,
            pub_key_y: None,
            address: "0xabc".into(),
        };
        assert_eq!(serde_json::to_string(&short).unwrap(), r#"{"address":"0xabc"}"#);
    }
}
