//! node set and client policy
//!
//! the node set is supplied once at startup (usually from a toml file) and
//! never changes for the lifetime of a client. every quorum is computed
//! against its size.
//!
//! ```toml
//! metadata_url = "https://metadata.example.org"
//!
//! [policy]
//! threshold = 3
//! session_timeout_secs = 300
//!
//! [[nodes]]
//! url = "https://node-1.example.org/jrpc"
//! pub_key_x = "4086d123bd8b370db29e84604cd54fa9f1aeb544dba1cc9ff7c856f41b5bf269"
//! pub_key_y = "fde2ac475d8d2796aab2dea7426bc57571c26acad4f141463c036c9df3a8b8e8"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use k256::ProjectivePoint;
use serde::Deserialize;

use crate::curve::{pad_hex64, point_from_coordinates};
use crate::{Error, Result};

/// a custodian node's static public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePublicKey {
    /// padded hex x coordinate
    pub x: String,
    /// padded hex y coordinate
    pub y: String,
    point: ProjectivePoint,
}

impl NodePublicKey {
    pub fn from_coordinates(x: &str, y: &str) -> Result<Self> {
        let point = point_from_coordinates(x, y)?;
        Ok(Self {
            x: pad_hex64(x)?,
            y: pad_hex64(y)?,
            point,
        })
    }

    pub fn from_point(point: ProjectivePoint) -> Result<Self> {
        let (x, y) = crate::curve::point_coordinates(&point)?;
        Ok(Self { x, y, point })
    }

    pub fn point(&self) -> &ProjectivePoint {
        &self.point
    }
}

/// one custodian node
#[derive(Clone, Debug)]
pub struct NodeEndpoint {
    /// 1-indexed position in the node set, also the node's share index
    pub index: u32,
    /// rpc url
    pub url: String,
    /// static public key (commitment signatures are checked against it)
    pub public_key: NodePublicKey,
}

/// ordered, immutable set of custodian nodes
#[derive(Clone, Debug)]
pub struct NodeSet {
    nodes: Arc<[NodeEndpoint]>,
}

impl NodeSet {
    /// build from `(url, public key)` pairs, indexed in order from 1
    pub fn new(nodes: Vec<(String, NodePublicKey)>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Config("node set is empty".into()));
        }
        let nodes: Vec<NodeEndpoint> = nodes
            .into_iter()
            .enumerate()
            .map(|(i, (url, public_key))| NodeEndpoint {
                index: i as u32 + 1,
                url,
                public_key,
            })
            .collect();
        Ok(Self {
            nodes: nodes.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeEndpoint> {
        self.nodes.iter()
    }

    /// node by 1-indexed position
    pub fn get(&self, index: u32) -> Option<&NodeEndpoint> {
        index
            .checked_sub(1)
            .and_then(|i| self.nodes.get(i as usize))
    }
}

/// retry policy for a single node call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// total attempts including the first
    pub max_attempts: u32,
    /// delay before attempt `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// quorum sizes and deadlines used by the client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// shares needed to reconstruct a key
    pub threshold: usize,
    /// valid commitment signatures needed before shares are requested
    pub commitment_quorum: usize,
    /// matching lookup replies needed to accept a key (or its absence)
    pub lookup_quorum: usize,
    /// hard deadline for a whole retrieval session
    pub session_timeout: Duration,
    /// deadline for collecting commitment signatures
    pub commitment_timeout: Duration,
    /// per request http timeout
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// majority quorums for a network of `n` nodes
    pub fn for_nodes(n: usize) -> Self {
        let majority = n / 2 + 1;
        Self {
            threshold: majority,
            commitment_quorum: majority,
            lookup_quorum: majority,
            session_timeout: Duration::from_secs(300),
            commitment_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }

    /// check quorum sizes against a network of `n` nodes
    pub fn validate(&self, n: usize) -> Result<()> {
        if self.threshold == 0 || self.threshold > n {
            return Err(Error::Config(format!(
                "threshold {} out of range for {} nodes",
                self.threshold, n
            )));
        }
        // shares are only requested from nodes that signed the commitment
        if self.commitment_quorum < self.threshold || self.commitment_quorum > n {
            return Err(Error::Config(format!(
                "commitment quorum {} must be between threshold {} and {} nodes",
                self.commitment_quorum, self.threshold, n
            )));
        }
        if self.lookup_quorum == 0 || self.lookup_quorum > n {
            return Err(Error::Config(format!(
                "lookup quorum {} out of range for {} nodes",
                self.lookup_quorum, n
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

// === file format ===

#[derive(Clone, Debug, Deserialize)]
struct NodeEntry {
    url: String,
    pub_key_x: String,
    pub_key_y: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct PolicyEntry {
    threshold: Option<usize>,
    commitment_quorum: Option<usize>,
    lookup_quorum: Option<usize>,
    session_timeout_secs: Option<u64>,
    commitment_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
struct NetworkFile {
    metadata_url: String,
    #[serde(default)]
    policy: PolicyEntry,
    nodes: Vec<NodeEntry>,
}

/// everything needed to talk to one network
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub metadata_url: String,
    pub nodes: NodeSet,
    pub client: ClientConfig,
}

impl NetworkConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: NetworkFile = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;

        let nodes = file
            .nodes
            .into_iter()
            .map(|n| Ok((n.url, NodePublicKey::from_coordinates(&n.pub_key_x, &n.pub_key_y)?)))
            .collect::<Result<Vec<_>>>()?;
        let nodes = NodeSet::new(nodes)?;

        let p = file.policy;
        let mut client = ClientConfig::for_nodes(nodes.len());
        if let Some(t) = p.threshold {
            client.threshold = t;
            // a raised threshold drags the default commitment quorum with it
            client.commitment_quorum = client.commitment_quorum.max(t);
        }
        if let Some(q) = p.commitment_quorum {
            client.commitment_quorum = q;
        }
        if let Some(q) = p.lookup_quorum {
            client.lookup_quorum = q;
        }
        if let Some(s) = p.session_timeout_secs {
            client.session_timeout = Duration::from_secs(s);
        }
        if let Some(s) = p.commitment_timeout_secs {
            client.commitment_timeout = Duration::from_secs(s);
        }
        if let Some(s) = p.request_timeout_secs {
            client.request_timeout = Duration::from_secs(s);
        }
        if let Some(a) = p.max_attempts {
            client.retry.max_attempts = a;
        }
        if let Some(ms) = p.retry_backoff_ms {
            client.retry.backoff = Duration::from_millis(ms);
        }
        client.validate(nodes.len())?;

        Ok(Self {
            metadata_url: file.metadata_url,
            nodes,
            client,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }
}
