//! key retrieval session
//!
//! ```text
//! ephemeral key ─▶ token commitment ─▶ resolve address (extended)
//!      │                                        │
//!      ▼                                        ▼
//! commitment quorum ─▶ share request ─▶ reconstruct ─▶ nonce tweak ─▶ key
//! ```
//!
//! the whole pipeline runs against a session timer. whichever of the
//! pipeline or the timer finishes first decides the outcome; the other
//! is ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use k256::Scalar;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::client::Client;
use crate::crypto::{token_commitment, EphemeralKeyPair};
use crate::curve::scalar_to_hex;
use crate::metadata::{MetadataService, Nonce};
use crate::rpc::{Commitment, NodeRpc, ShareRequest};
use crate::{Error, Result};

/// settle-once outcome slot
///
/// the first `fulfill` or `reject` wins; later calls return false and
/// their value is dropped.
pub struct Resolution<T> {
    decided: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> Resolution<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            decided: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }

    pub fn fulfill(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    pub fn is_decided(&self) -> bool {
        self.decided.load(Ordering::Acquire)
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        if self
            .decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = tx {
            // receiver gone means the caller stopped waiting
            let _ = tx.send(outcome);
        }
        true
    }
}

/// aborts the wrapped task when dropped, including when the caller
/// abandons the session mid-flight
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// the user's final private key and its address
pub struct FinalKeyMaterial {
    private_key: Zeroizing<String>,
    pub public_address: String,
}

impl FinalKeyMaterial {
    /// 64-char lowercase hex
    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl std::fmt::Debug for FinalKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalKeyMaterial")
            .field("public_address", &self.public_address)
            .finish_non_exhaustive()
    }
}

/// `(nonce + secret) mod n`, or the secret unchanged for a zero nonce
pub fn apply_nonce(secret: &Scalar, nonce: &Nonce) -> Scalar {
    if nonce.is_zero() {
        *secret
    } else {
        nonce.to_scalar() + secret
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl<R: NodeRpc, M: MetadataService> Client<R, M> {
    /// recover the private key for a verifier id, bounded by the session timeout
    pub async fn retrieve_shares(
        &self,
        verifier: &str,
        verifier_id: &str,
        id_token: &str,
        extra_params: serde_json::Value,
    ) -> Result<FinalKeyMaterial> {
        let timeout = self.config.session_timeout;
        let (slot, mut outcome) = Resolution::new();

        let _timer = {
            let slot = slot.clone();
            AbortOnDrop(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if slot.reject(Error::Timeout(timeout)) {
                    warn!(?timeout, "retrieval session timed out");
                }
            }))
        };

        tokio::select! {
            biased;
            settled = &mut outcome => {
                return settled.unwrap_or(Err(Error::UnableToDerive));
            }
            result = self.derive_key(verifier, verifier_id, id_token, extra_params) => {
                match result {
                    Ok(key) => slot.fulfill(key),
                    Err(e) => slot.reject(e),
                };
            }
        }

        outcome.await.unwrap_or(Err(Error::UnableToDerive))
    }

    async fn derive_key(
        &self,
        verifier: &str,
        verifier_id: &str,
        id_token: &str,
        extra_params: serde_json::Value,
    ) -> Result<FinalKeyMaterial> {
        let session = EphemeralKeyPair::generate();
        let (temp_pub_x, temp_pub_y) = session.public_coordinates()?;

        let lookup = self.resolve_public_address(verifier, verifier_id, true).await?;
        let (Some(pub_key_x), Some(pub_key_y)) = (lookup.pub_key_x, lookup.pub_key_y) else {
            return Err(Error::UnableToDerive);
        };

        let commitment = Commitment {
            verifier: verifier.to_string(),
            token_commitment: token_commitment(id_token),
            temp_pub_x,
            temp_pub_y,
            timestamp: unix_now(),
        };
        let node_signatures = self.request_commitment(&commitment).await?;

        let request = ShareRequest {
            verifier: verifier.to_string(),
            verifier_id: verifier_id.to_string(),
            id_token: id_token.to_string(),
            node_signatures,
            extra_params,
        };
        let rebuilt = self
            .retrieve_and_reconstruct(&request, &pub_key_x, &pub_key_y, &session)
            .await?;

        let nonce = self.fetch_nonce(&rebuilt.pub_key_x, &rebuilt.pub_key_y).await?;
        let key = Zeroizing::new(apply_nonce(rebuilt.secret(), &nonce));

        info!(verifier, address = %lookup.address, "key retrieved");
        Ok(FinalKeyMaterial {
            private_key: Zeroizing::new(scalar_to_hex(&key)),
            public_address: lookup.address,
        })
    }
}
