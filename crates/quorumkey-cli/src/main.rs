//! quorumkey - resolve addresses and recover keys from a custodian node network
//!
//! usage:
//!   quorumkey -c network.toml lookup --verifier google --verifier-id alice@example.com
//!   QUORUMKEY_ID_TOKEN=$TOKEN quorumkey -c network.toml retrieve \
//!       --verifier google --verifier-id alice@example.com
//!   quorumkey demo --nodes 5 --threshold 3     # in-memory network, no config needed
//!
//! results are printed as json on stdout, logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quorumkey::local::LocalNetwork;
use quorumkey::{
    Client, ClientConfig, FinalKeyMaterial, MetadataService, NetworkConfig, NodeRpc, Nonce,
};
use serde::Serialize;
use tracing::info;

/// quorumkey - threshold key network client
#[derive(Parser)]
#[command(name = "quorumkey")]
#[command(about = "resolve addresses and recover keys from a custodian node network")]
#[command(version)]
struct Args {
    /// network config (toml)
    #[arg(short, long, env = "QUORUMKEY_CONFIG", default_value = "network.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// resolve the public address of a verifier id, assigning a key if needed
    Lookup {
        #[arg(long)]
        verifier: String,

        #[arg(long)]
        verifier_id: String,

        /// include the public key coordinates
        #[arg(long)]
        extended: bool,
    },

    /// recover the private key of a verifier id
    Retrieve {
        #[arg(long)]
        verifier: String,

        #[arg(long)]
        verifier_id: String,

        /// login token issued by the verifier
        #[arg(long, env = "QUORUMKEY_ID_TOKEN", hide_env_values = true)]
        id_token: String,

        /// json object merged into the share request
        #[arg(long)]
        extra_params: Option<String>,

        /// print the private key (only the address otherwise)
        #[arg(long)]
        reveal: bool,
    },

    /// run lookup and retrieval against an in-memory network
    Demo {
        #[arg(long, default_value = "5")]
        nodes: usize,

        #[arg(long, default_value = "3")]
        threshold: usize,

        /// metadata nonce to tweak the demo key with
        #[arg(long, default_value = "0")]
        nonce: u64,
    },
}

#[derive(Serialize)]
struct RetrieveOutput<'a> {
    public_address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key: Option<&'a str>,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_key(key: &FinalKeyMaterial, reveal: bool) -> anyhow::Result<()> {
    print_json(&RetrieveOutput {
        public_address: &key.public_address,
        private_key: reveal.then(|| key.private_key()),
    })
}

async fn lookup<R: NodeRpc, M: MetadataService>(
    client: &Client<R, M>,
    verifier: &str,
    verifier_id: &str,
    extended: bool,
) -> anyhow::Result<()> {
    let result = client
        .resolve_public_address(verifier, verifier_id, extended)
        .await
        .context("lookup failed")?;
    print_json(&result)
}

async fn retrieve<R: NodeRpc, M: MetadataService>(
    client: &Client<R, M>,
    verifier: &str,
    verifier_id: &str,
    id_token: &str,
    extra_params: Option<String>,
    reveal: bool,
) -> anyhow::Result<()> {
    let extra = match extra_params {
        Some(raw) => serde_json::from_str(&raw).context("--extra-params is not valid json")?,
        None => serde_json::json!({}),
    };
    let key = client
        .retrieve_shares(verifier, verifier_id, id_token, extra)
        .await
        .context("key retrieval failed")?;
    print_key(&key, reveal)
}

async fn demo(nodes: usize, threshold: usize, nonce: u64) -> anyhow::Result<()> {
    const VERIFIER: &str = "demo";
    const VERIFIER_ID: &str = "alice@example.com";

    let net = LocalNetwork::new(nodes, threshold)?;
    let mut config = ClientConfig::for_nodes(nodes);
    config.threshold = threshold;
    config.commitment_quorum = config.commitment_quorum.max(threshold);
    let client = Client::new(net.node_set(), config, net.clone(), net.clone())?;

    info!(nodes, threshold, "in-memory network up");
    let lookup = client.resolve_public_address(VERIFIER, VERIFIER_ID, true).await?;
    if nonce != 0 {
        net.set_nonce(VERIFIER, VERIFIER_ID, Nonce::from_u64(nonce))?;
    }

    let key = client
        .retrieve_shares(VERIFIER, VERIFIER_ID, "demo-id-token", serde_json::json!({}))
        .await?;
    let tweaked = client.resolve_public_address(VERIFIER, VERIFIER_ID, false).await?;
    anyhow::ensure!(
        key.public_address == tweaked.address,
        "recovered key does not control {}",
        tweaked.address
    );

    print_json(&serde_json::json!({
        "lookup": lookup,
        "public_address": key.public_address,
        "private_key": key.private_key(),
        "share_requests": net.call_count("share_request"),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quorumkey=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Demo {
            nodes,
            threshold,
            nonce,
        } => demo(nodes, threshold, nonce).await,
        Command::Lookup {
            verifier,
            verifier_id,
            extended,
        } => {
            let client = connect(&args.config)?;
            lookup(&client, &verifier, &verifier_id, extended).await
        }
        Command::Retrieve {
            verifier,
            verifier_id,
            id_token,
            extra_params,
            reveal,
        } => {
            let client = connect(&args.config)?;
            retrieve(&client, &verifier, &verifier_id, &id_token, extra_params, reveal).await
        }
    }
}

fn connect(
    path: &std::path::Path,
) -> anyhow::Result<Client<quorumkey::network::HttpNodeRpc, quorumkey::network::HttpMetadata>> {
    let network = NetworkConfig::load(path)
        .with_context(|| format!("loading network config {}", path.display()))?;
    info!(
        nodes = network.nodes.len(),
        threshold = network.client.threshold,
        "network config loaded"
    );
    Ok(Client::from_network_config(&network)?)
}
