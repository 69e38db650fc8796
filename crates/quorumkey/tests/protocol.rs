//! end to end protocol runs against the in-memory network

use std::time::Duration;

use k256::Scalar;
use quorumkey::crypto::{token_commitment, EphemeralKeyPair};
use quorumkey::curve::{
    point_coordinates, public_key_to_address, scalar_from_hex, scalar_to_hex, scalar_to_point,
};
use quorumkey::local::{LocalNetwork, NodeBehaviour};
use quorumkey::rpc::Commitment;
use quorumkey::{Client, ClientConfig, Error, Nonce};
use serde_json::json;

const VERIFIER: &str = "google";
const USER: &str = "alice@example.com";
const TOKEN: &str = "eyJhbGciOiJSUzI1NiJ9.alice.sig";

fn client_with(net: &LocalNetwork, config: ClientConfig) -> Client<LocalNetwork, LocalNetwork> {
    Client::new(net.node_set(), config, net.clone(), net.clone()).unwrap()
}

fn client(net: &LocalNetwork) -> Client<LocalNetwork, LocalNetwork> {
    client_with(net, ClientConfig::for_nodes(net.node_set().len()))
}

/// five nodes, threshold three
fn network() -> LocalNetwork {
    LocalNetwork::new(5, 3).unwrap()
}

#[tokio::test]
async fn test_fresh_identity_gets_provisioned() {
    let net = network();
    let client = client(&net);

    let lookup = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    let key = net.assigned_key(VERIFIER, USER).expect("key assigned");
    assert_eq!(lookup.address, public_key_to_address(&key).unwrap());
    assert!(lookup.address.starts_with("0x"));
    assert_eq!(lookup.address.len(), 42);
    assert!(lookup.pub_key_x.is_none());
    assert_eq!(net.call_count("key_assign"), 1);
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let net = network();
    let client = client(&net);

    let first = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();
    let second = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(net.call_count("key_assign"), 1);
}

#[tokio::test]
async fn test_extended_lookup_reports_padded_key() {
    let net = network();
    let client = client(&net);

    let lookup = client.resolve_public_address(VERIFIER, USER, true).await.unwrap();
    let (x, y) = point_coordinates(&net.assigned_key(VERIFIER, USER).unwrap()).unwrap();

    assert_eq!(lookup.pub_key_x.as_deref(), Some(x.as_str()));
    assert_eq!(lookup.pub_key_y.as_deref(), Some(y.as_str()));
    assert_eq!(x.len(), 64);
}

#[tokio::test]
async fn test_nonce_tweaks_the_address() {
    let net = network();
    let client = client(&net);

    let untweaked = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();
    net.set_nonce(VERIFIER, USER, Nonce::from_u64(12345)).unwrap();

    let tweaked = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();
    let again = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    let secret = net.secret_for(VERIFIER, USER).unwrap();
    let tweaked_key = scalar_to_point(&(secret + Scalar::from(12345u64)));
    let expected = public_key_to_address(&tweaked_key).unwrap();
    assert_ne!(untweaked.address, tweaked.address);
    assert_eq!(tweaked.address, expected);
    assert_eq!(tweaked, again);
}

#[tokio::test]
async fn test_retrieve_recovers_assigned_key() {
    let net = network();
    let client = client(&net);

    let lookup = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();
    let key = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap();

    let secret = net.secret_for(VERIFIER, USER).unwrap();
    assert_eq!(key.private_key(), scalar_to_hex(&secret));
    assert_eq!(key.private_key().len(), 64);
    assert_eq!(key.public_address, lookup.address);
}

#[tokio::test]
async fn test_retrieve_applies_nonce() {
    let net = network();
    let client = client(&net);

    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();
    net.set_nonce(VERIFIER, USER, Nonce::from_u64(12345)).unwrap();

    let key = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap();
    let secret = net.secret_for(VERIFIER, USER).unwrap();
    let private = scalar_from_hex(key.private_key()).unwrap();

    assert_eq!(private, secret + Scalar::from(12345u64));
    // the key controls the address the resolver hands out
    assert_eq!(
        public_key_to_address(&scalar_to_point(&private)).unwrap(),
        key.public_address
    );
}

#[tokio::test]
async fn test_retrieve_provisions_unknown_identity() {
    let net = network();
    let client = client(&net);

    let key = client
        .retrieve_shares(VERIFIER, "bob@example.com", TOKEN, json!({}))
        .await
        .unwrap();
    let secret = net.secret_for(VERIFIER, "bob@example.com").unwrap();
    assert_eq!(key.private_key(), scalar_to_hex(&secret));
}

#[tokio::test]
async fn test_bad_signatures_block_share_release() {
    let net = network();
    let client = client(&net);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    for i in 1..=3 {
        net.set_behaviour(i, NodeBehaviour::BadSignature).unwrap();
    }

    let err = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap_err();
    assert!(matches!(err, Error::CommitmentQuorumNotReached { have: 2, need: 3 }));
    assert_eq!(net.call_count("share_request"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_commitment_deadline() {
    let net = network();
    let client = client(&net);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    for i in 3..=5 {
        net.set_behaviour(i, NodeBehaviour::Silent).unwrap();
    }

    let session = EphemeralKeyPair::generate();
    let (temp_pub_x, temp_pub_y) = session.public_coordinates().unwrap();
    let commitment = Commitment {
        verifier: VERIFIER.into(),
        token_commitment: token_commitment(TOKEN),
        temp_pub_x,
        temp_pub_y,
        timestamp: 1_700_000_000,
    };

    let started = tokio::time::Instant::now();
    let err = client.request_commitment(&commitment).await.unwrap_err();
    assert!(matches!(err, Error::CommitmentQuorumNotReached { have: 2, need: 3 }));
    assert!(started.elapsed() >= client.config().commitment_timeout);
}

#[tokio::test(start_paused = true)]
async fn test_session_times_out_then_recovers() {
    let net = network();
    let client = client(&net);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::Silent).unwrap();
    }
    let err = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(300)));

    // a fresh call after the network recovers is unaffected
    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::Honest).unwrap();
    }
    let key = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap();
    let secret = net.secret_for(VERIFIER, USER).unwrap();
    assert_eq!(key.private_key(), scalar_to_hex(&secret));
}

#[tokio::test]
async fn test_bad_shares_are_tolerated_with_spare_signers() {
    let net = network();
    let mut config = ClientConfig::for_nodes(5);
    config.commitment_quorum = 5;
    let client = client_with(&net, config);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    net.set_behaviour(1, NodeBehaviour::CorruptShare).unwrap();
    net.set_behaviour(2, NodeBehaviour::WrongShare).unwrap();

    let key = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap();
    let secret = net.secret_for(VERIFIER, USER).unwrap();
    assert_eq!(key.private_key(), scalar_to_hex(&secret));
}

#[tokio::test]
async fn test_wrong_shares_never_yield_a_key() {
    let net = network();
    let client = client(&net);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::WrongShare).unwrap();
    }
    let err = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap_err();
    assert!(matches!(err, Error::KeyMismatch));
}

#[tokio::test]
async fn test_undecryptable_shares() {
    let net = network();
    let client = client(&net);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::CorruptShare).unwrap();
    }
    let err = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ShareDecryption(_)));
}

#[tokio::test]
async fn test_refused_shares() {
    let net = network();
    let mut config = ClientConfig::for_nodes(5);
    config.commitment_quorum = 5;
    let client = client_with(&net, config);
    client.resolve_public_address(VERIFIER, USER, false).await.unwrap();

    for i in 1..=3 {
        net.set_behaviour(i, NodeBehaviour::RefuseShares).unwrap();
    }
    // refusals can land first, so collection may stop before the honest shares arrive
    let err = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientShares { have, need: 3 } if have <= 2));
}

#[tokio::test(start_paused = true)]
async fn test_flaky_nodes_are_retried() {
    let net = network();
    let client = client(&net);

    net.set_behaviour(1, NodeBehaviour::Flaky(2)).unwrap();
    net.set_behaviour(2, NodeBehaviour::Flaky(2)).unwrap();
    net.set_behaviour(3, NodeBehaviour::Flaky(1)).unwrap();

    let key = client.retrieve_shares(VERIFIER, USER, TOKEN, json!({})).await.unwrap();
    let secret = net.secret_for(VERIFIER, USER).unwrap();
    assert_eq!(key.private_key(), scalar_to_hex(&secret));
    assert!(net.call_count("key_lookup") > 5);
}

#[tokio::test(start_paused = true)]
async fn test_offline_majority() {
    let net = network();
    let client = client(&net);

    for i in 1..=3 {
        net.set_behaviour(i, NodeBehaviour::Offline).unwrap();
    }
    let err = client.resolve_public_address(VERIFIER, USER, false).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NodesUnavailable {
            reachable: 2,
            total: 5,
            need: 3
        }
    ));
    assert!(net.assigned_key(VERIFIER, USER).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_offline_minority_still_resolves() {
    let net = network();
    let client = client(&net);

    net.set_behaviour(4, NodeBehaviour::Offline).unwrap();
    net.set_behaviour(5, NodeBehaviour::Offline).unwrap();

    let lookup = client.resolve_public_address(VERIFIER, USER, false).await.unwrap();
    let key = net.assigned_key(VERIFIER, USER).unwrap();
    assert_eq!(lookup.address, public_key_to_address(&key).unwrap());
}

#[tokio::test]
async fn test_disagreeing_nodes_are_inconsistent() {
    let net = network();
    let client = client(&net);

    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::ForeignKey).unwrap();
    }
    let err = client.resolve_public_address(VERIFIER, USER, false).await.unwrap_err();
    assert!(matches!(err, Error::InconsistentLookup));
    assert_eq!(net.call_count("key_assign"), 0);
}

#[tokio::test]
async fn test_forgotten_assignment() {
    let net = network();
    let client = client(&net);

    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::ForgetAssignments).unwrap();
    }
    let err = client.resolve_public_address(VERIFIER, USER, false).await.unwrap_err();
    assert!(matches!(err, Error::KeyNotAssigned));
    assert_eq!(net.call_count("key_assign"), 1);
}

#[tokio::test]
async fn test_refused_assignment_reaches_caller() {
    let net = network();
    let client = client(&net);

    for i in 1..=5 {
        net.set_behaviour(i, NodeBehaviour::RefuseAssignment).unwrap();
    }
    let err = client.resolve_public_address(VERIFIER, USER, false).await.unwrap_err();
    assert!(matches!(&err, Error::Rpc(msg) if msg.contains("not supported")));
    // protocol errors are not retried
    assert_eq!(net.call_count("key_assign"), 5);
}

#[tokio::test]
async fn test_rejected_lookup_is_not_unavailability() {
    let net = network();
    let client = client(&net);

    for i in 1..=3 {
        net.set_behaviour(i, NodeBehaviour::Reject).unwrap();
    }
    let err = client.resolve_public_address(VERIFIER, USER, false).await.unwrap_err();
    assert!(matches!(err, Error::Rpc(_)));
    assert!(net.assigned_key(VERIFIER, USER).is_none());
}
