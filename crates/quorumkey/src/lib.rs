//! # quorumkey
//!
//! client side of a threshold key network: resolve a login identity to a
//! public address, and recover its private key from custodian node shares.
//!
//! ## architecture
//!
//! ```text
//!        (verifier, verifier_id, id_token)
//!                     │
//!        ┌────────────┼────────────┐
//!        ▼            ▼            ▼
//!     ┌─────┐      ┌─────┐      ┌─────┐
//!     │node1│      │node2│ ...  │nodeN│   lookup / assign, quorum t
//!     └──┬──┘      └──┬──┘      └──┬──┘
//!        │  commitment signatures  │      keccak(id_token) + session key
//!        └──────┬─────┴─────┬──────┘
//!               ▼           ▼
//!         encrypted shares (≥ t)           ecdh → hkdf → chacha20poly1305
//!               │
//!               ▼
//!        ┌──────────────┐
//!        │ interpolate  │  checked against the looked-up key
//!        └──────┬───────┘
//!               │ + metadata nonce (mod n)
//!               ▼
//!        ┌──────────────┐
//!        │ private key  │
//!        └──────────────┘
//! ```
//!
//! ## security properties
//!
//! - the login token is only revealed after a quorum signed its commitment
//! - shares travel encrypted to a per-session key
//! - fewer than `t` shares reveal nothing about the key
//! - a reconstructed key is only returned if it matches the agreed public key
//! - the whole retrieval is bounded by a session timeout
//!
//! ## usage
//!
//! ```rust,ignore
//! use quorumkey::{Client, NetworkConfig};
//!
//! let network = NetworkConfig::load("network.toml")?;
//! let client = Client::from_network_config(&network)?;
//!
//! let lookup = client.resolve_public_address("google", "alice@example.com", false).await?;
//! println!("address: {}", lookup.address);
//!
//! let key = client
//!     .retrieve_shares("google", "alice@example.com", &id_token, serde_json::json!({}))
//!     .await?;
//! assert_eq!(key.public_address, lookup.address);
//! ```

pub mod client;
pub mod commitment;
pub mod config;
pub mod crypto;
pub mod curve;
pub mod error;
pub mod metadata;
pub mod quorum;
pub mod resolver;
pub mod retrieval;
pub mod rpc;
pub mod session;
pub mod vss;

#[cfg(feature = "network")]
pub mod network;

#[cfg(feature = "local")]
pub mod local;

pub use client::Client;
pub use config::{ClientConfig, NetworkConfig, NodeSet, RetryPolicy};
pub use error::{Error, Result};
pub use metadata::{MetadataService, Nonce};
pub use resolver::LookupResult;
pub use rpc::NodeRpc;
pub use session::FinalKeyMaterial;
