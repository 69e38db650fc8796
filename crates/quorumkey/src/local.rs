//! in-process custodian network
//!
//! a full node set held in memory: key assignment with shamir sharing,
//! commitment signing, share encryption to the session key and a
//! metadata nonce store. individual nodes can be switched to faulty
//! behaviours to exercise the client's quorum handling.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tracing::debug;

use crate::commitment::{sign_commitment, verify_commitment_signature};
use crate::config::{NodeEndpoint, NodePublicKey, NodeSet};
use crate::crypto::{encrypt_share, token_commitment};
use crate::curve::{pad_hex64, point_coordinates, point_from_coordinates, public_key_to_address};
use crate::metadata::{MetadataService, Nonce};
use crate::rpc::{
    Commitment, EncryptedShare, LookupKey, LookupReply, NodeRpc, NodeSignature, ShareRequest,
};
use crate::vss::{split_secret, Share};
use crate::{Error, Result};

/// how a simulated node responds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeBehaviour {
    #[default]
    Honest,
    /// every call fails with a network error
    Offline,
    /// every call hangs forever
    Silent,
    /// the next `n` calls fail with a network error, then honest
    Flaky(u32),
    /// signs something other than the commitment it reports
    BadSignature,
    /// share ciphertext is tampered with
    CorruptShare,
    /// share decrypts fine but is not on the polynomial
    WrongShare,
    /// rejects every share request
    RefuseShares,
    /// answers every call with a protocol error
    Reject,
    /// rejects key assignment, otherwise honest
    RefuseAssignment,
    /// acknowledges key assignment without storing anything
    ForgetAssignments,
    /// reports a key of its own for every lookup
    ForeignKey,
}

struct LocalNode {
    signer: SigningKey,
    public_key: NodePublicKey,
    behaviour: NodeBehaviour,
}

struct Assignment {
    public: ProjectivePoint,
    secret: Scalar,
    shares: Vec<Share>,
}

#[derive(Default)]
struct State {
    nodes: Vec<LocalNode>,
    /// (verifier, verifier_id) -> key
    assignments: HashMap<(String, String), Assignment>,
    /// token commitment -> session public key
    commitments: HashMap<String, ProjectivePoint>,
    /// padded (x, y) -> nonce
    nonces: HashMap<(String, String), Nonce>,
    calls: HashMap<&'static str, usize>,
}

/// in-memory node set implementing both [`NodeRpc`] and [`MetadataService`]
#[derive(Clone)]
pub struct LocalNetwork {
    threshold: usize,
    nodes: NodeSet,
    state: Arc<RwLock<State>>,
}

impl LocalNetwork {
    /// `n` honest nodes sharing keys with threshold `t`
    pub fn new(n: usize, threshold: usize) -> Result<Self> {
        if n == 0 || threshold == 0 || threshold > n {
            return Err(Error::Config(format!(
                "threshold {} invalid for {} nodes",
                threshold, n
            )));
        }

        let mut nodes = Vec::with_capacity(n);
        let mut endpoints = Vec::with_capacity(n);
        for i in 1..=n {
            let signer = SigningKey::random(&mut OsRng);
            let point = ProjectivePoint::from(*signer.verifying_key().as_affine());
            let public_key = NodePublicKey::from_point(point)?;
            endpoints.push((format!("local://node-{}", i), public_key.clone()));
            nodes.push(LocalNode {
                signer,
                public_key,
                behaviour: NodeBehaviour::Honest,
            });
        }

        Ok(Self {
            threshold,
            nodes: NodeSet::new(endpoints)?,
            state: Arc::new(RwLock::new(State {
                nodes,
                ..State::default()
            })),
        })
    }

    pub fn node_set(&self) -> NodeSet {
        self.nodes.clone()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// change a node's behaviour (1-indexed)
    pub fn set_behaviour(&self, index: u32, behaviour: NodeBehaviour) -> Result<()> {
        let mut state = self.write();
        let node = state.node_mut(index)?;
        node.behaviour = behaviour;
        Ok(())
    }

    /// record a nonce for an already assigned key
    pub fn set_nonce(&self, verifier: &str, verifier_id: &str, nonce: Nonce) -> Result<()> {
        let mut state = self.write();
        let public = state
            .assignments
            .get(&(verifier.to_string(), verifier_id.to_string()))
            .map(|a| a.public)
            .ok_or(Error::KeyNotAssigned)?;
        let coords = point_coordinates(&public)?;
        state.nonces.insert(coords, nonce);
        Ok(())
    }

    /// the untweaked public key assigned to an identity
    pub fn assigned_key(&self, verifier: &str, verifier_id: &str) -> Option<ProjectivePoint> {
        self.read()
            .assignments
            .get(&(verifier.to_string(), verifier_id.to_string()))
            .map(|a| a.public)
    }

    /// the untweaked private key assigned to an identity
    pub fn secret_for(&self, verifier: &str, verifier_id: &str) -> Option<Scalar> {
        self.read()
            .assignments
            .get(&(verifier.to_string(), verifier_id.to_string()))
            .map(|a| a.secret)
    }

    /// how many times `op` reached any node
    pub fn call_count(&self, op: &str) -> usize {
        self.read().calls.get(op).copied().unwrap_or(0)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// count the call and apply the node's failure mode
    async fn gate(&self, node: &NodeEndpoint, op: &'static str) -> Result<NodeBehaviour> {
        let behaviour = {
            let mut state = self.write();
            *state.calls.entry(op).or_default() += 1;
            let local = state.node_mut(node.index)?;
            match local.behaviour {
                NodeBehaviour::Flaky(0) => NodeBehaviour::Honest,
                NodeBehaviour::Flaky(left) => {
                    local.behaviour = NodeBehaviour::Flaky(left - 1);
                    NodeBehaviour::Offline
                }
                b => b,
            }
        };

        match behaviour {
            NodeBehaviour::Offline => Err(Error::Network(format!("{} unreachable", node.url))),
            NodeBehaviour::Silent => futures::future::pending().await,
            NodeBehaviour::Reject => Err(Error::Rpc(format!("{} rejected {}", node.url, op))),
            b => Ok(b),
        }
    }
}

impl State {
    fn node_mut(&mut self, index: u32) -> Result<&mut LocalNode> {
        index
            .checked_sub(1)
            .and_then(|i| self.nodes.get_mut(i as usize))
            .ok_or(Error::InvalidIndex)
    }

    fn node(&self, index: u32) -> Result<&LocalNode> {
        index
            .checked_sub(1)
            .and_then(|i| self.nodes.get(i as usize))
            .ok_or(Error::InvalidIndex)
    }

    /// signatures that are valid, from distinct nodes, over a commitment to `token`
    fn authorising_signatures(&self, token: &str, signatures: &[NodeSignature]) -> usize {
        let prefix = format!("{}\u{1c}{}\u{1c}", Commitment::PREFIX, token);
        let mut seen = Vec::new();
        for sig in signatures {
            if seen.contains(&sig.node_index) || !sig.data.starts_with(&prefix) {
                continue;
            }
            let Ok(node) = self.node(sig.node_index) else {
                continue;
            };
            if verify_commitment_signature(&node.public_key, &sig.data, &sig.signature) {
                seen.push(sig.node_index);
            }
        }
        seen.len()
    }
}

#[async_trait]
impl NodeRpc for LocalNetwork {
    async fn key_lookup(
        &self,
        node: &NodeEndpoint,
        verifier: &str,
        verifier_id: &str,
    ) -> Result<LookupReply> {
        let behaviour = self.gate(node, "key_lookup").await?;
        if behaviour == NodeBehaviour::ForeignKey {
            let foreign = ProjectivePoint::GENERATOR * Scalar::from(1000 + node.index as u64);
            let (x, y) = point_coordinates(&foreign)?;
            return Ok(LookupReply::Found(LookupKey {
                pub_key_x: x,
                pub_key_y: y,
                address: None,
            }));
        }
        let state = self.read();
        let Some(assignment) = state
            .assignments
            .get(&(verifier.to_string(), verifier_id.to_string()))
        else {
            return Ok(LookupReply::NotFound);
        };
        let (x, y) = point_coordinates(&assignment.public)?;
        Ok(LookupReply::Found(LookupKey {
            pub_key_x: x,
            pub_key_y: y,
            address: Some(public_key_to_address(&assignment.public)?),
        }))
    }

    async fn key_assign(
        &self,
        node: &NodeEndpoint,
        verifier: &str,
        verifier_id: &str,
    ) -> Result<()> {
        match self.gate(node, "key_assign").await? {
            NodeBehaviour::RefuseAssignment => {
                return Err(Error::Rpc(format!("verifier {} not supported", verifier)));
            }
            NodeBehaviour::ForgetAssignments => return Ok(()),
            _ => {}
        }
        let mut state = self.write();
        let id = (verifier.to_string(), verifier_id.to_string());
        if state.assignments.contains_key(&id) {
            return Ok(());
        }

        let secret = Scalar::random(&mut OsRng);
        let shares = split_secret(&secret, self.threshold, state.nodes.len())?;
        state.assignments.insert(
            id,
            Assignment {
                public: ProjectivePoint::GENERATOR * secret,
                secret,
                shares,
            },
        );
        debug!(node = node.index, verifier, "assigned new key");
        Ok(())
    }

    async fn commitment_request(
        &self,
        node: &NodeEndpoint,
        commitment: &Commitment,
    ) -> Result<NodeSignature> {
        let behaviour = self.gate(node, "commitment_request").await?;
        let session_key = point_from_coordinates(&commitment.temp_pub_x, &commitment.temp_pub_y)
            .map_err(|_| Error::Rpc("invalid session public key".into()))?;

        let mut state = self.write();
        state
            .commitments
            .insert(commitment.token_commitment.clone(), session_key);

        let local = state.node(node.index)?;
        let data = commitment.message();
        let signed = match behaviour {
            NodeBehaviour::BadSignature => format!("{}\u{1c}forged", data),
            _ => data.clone(),
        };
        Ok(NodeSignature {
            node_index: node.index,
            signature: sign_commitment(&local.signer, &signed),
            data,
            node_pub_x: local.public_key.x.clone(),
            node_pub_y: local.public_key.y.clone(),
        })
    }

    async fn share_request(
        &self,
        node: &NodeEndpoint,
        request: &ShareRequest,
    ) -> Result<EncryptedShare> {
        let behaviour = self.gate(node, "share_request").await?;
        if behaviour == NodeBehaviour::RefuseShares {
            return Err(Error::Rpc("share request refused".into()));
        }

        let (session_key, mut value) = {
            let state = self.read();
            let token = token_commitment(&request.id_token);
            let session_key = *state
                .commitments
                .get(&token)
                .ok_or_else(|| Error::Rpc("no commitment for token".into()))?;

            if state.authorising_signatures(&token, &request.node_signatures) < self.threshold {
                return Err(Error::Rpc("not enough valid commitment signatures".into()));
            }

            let assignment = state
                .assignments
                .get(&(request.verifier.clone(), request.verifier_id.clone()))
                .ok_or_else(|| Error::Rpc("verifier id has not yet been assigned".into()))?;
            let share = assignment
                .shares
                .iter()
                .find(|s| s.index == node.index)
                .ok_or(Error::InvalidIndex)?;
            (session_key, share.value)
        };

        if behaviour == NodeBehaviour::WrongShare {
            value += Scalar::ONE;
        }
        let mut encrypted = encrypt_share(&session_key, node.index, &value)?;
        if behaviour == NodeBehaviour::CorruptShare {
            if let Some(byte) = encrypted.ciphertext.first_mut() {
                *byte ^= 0xff;
            }
        }
        Ok(encrypted)
    }
}

#[async_trait]
impl MetadataService for LocalNetwork {
    async fn get_nonce(&self, pub_key_x: &str, pub_key_y: &str) -> Result<Nonce> {
        let coords = (pad_hex64(pub_key_x)?, pad_hex64(pub_key_y)?);
        let mut state = self.write();
        *state.calls.entry("get_nonce").or_default() += 1;
        Ok(state.nonces.get(&coords).copied().unwrap_or(Nonce::ZERO))
    }
}
