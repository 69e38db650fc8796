//! protocol client
//!
//! ties together: node set, quorum policy, node rpc, metadata service and
//! share decryption. the protocol steps live in their own modules as
//! `impl Client` blocks:
//!
//! - [`crate::resolver`]: public address resolution
//! - [`crate::commitment`]: commitment handshake
//! - [`crate::retrieval`]: share retrieval and reconstruction
//! - [`crate::session`]: the full key retrieval session

use std::sync::Arc;

use crate::config::{ClientConfig, NodeSet};
use crate::crypto::{EciesDecryptor, ShareDecryptor};
use crate::metadata::MetadataService;
use crate::rpc::NodeRpc;
use crate::Result;

pub struct Client<R, M> {
    pub(crate) nodes: NodeSet,
    pub(crate) config: ClientConfig,
    pub(crate) rpc: R,
    pub(crate) metadata: M,
    pub(crate) decryptor: Arc<dyn ShareDecryptor>,
}

impl<R: NodeRpc, M: MetadataService> Client<R, M> {
    /// create a client for a fixed node set
    pub fn new(nodes: NodeSet, config: ClientConfig, rpc: R, metadata: M) -> Result<Self> {
        config.validate(nodes.len())?;
        Ok(Self {
            nodes,
            config,
            rpc,
            metadata,
            decryptor: Arc::new(EciesDecryptor),
        })
    }

    /// use a different share encryption scheme
    pub fn with_decryptor(mut self, decryptor: impl ShareDecryptor + 'static) -> Self {
        self.decryptor = Arc::new(decryptor);
        self
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(feature = "network")]
impl Client<crate::network::HttpNodeRpc, crate::network::HttpMetadata> {
    /// client over http json-rpc for a loaded network config
    pub fn from_network_config(network: &crate::config::NetworkConfig) -> Result<Self> {
        let rpc = crate::network::HttpNodeRpc::new(network.client.request_timeout)?;
        let metadata = crate::network::HttpMetadata::new(
            &network.metadata_url,
            network.client.request_timeout,
        )?;
        Self::new(network.nodes.clone(), network.client.clone(), rpc, metadata)
    }
}
