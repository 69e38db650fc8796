//! http transport: json-rpc 2.0 to custodian nodes, rest to the metadata service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::NodeEndpoint;
use crate::metadata::{MetadataService, Nonce};
use crate::rpc::{
    Commitment, EncryptedShare, LookupKey, LookupReply, NodeRpc, NodeSignature, ShareRequest,
};
use crate::{Error, Result};

/// marker in a lookup error for an identity with no key yet
const NOT_ASSIGNED: &str = "not yet been assigned";

fn transport_error(e: reqwest::Error) -> Error {
    Error::Network(e.to_string())
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcError {
    fn describe(&self) -> String {
        match &self.data {
            Some(Value::String(data)) => format!("{} ({}): {}", self.message, self.code, data),
            _ => format!("{} ({})", self.message, self.code),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeysResult<T> {
    keys: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SignatureResult {
    data: String,
    signature: String,
    nodepubx: String,
    nodepuby: String,
}

/// [`NodeRpc`] over http json-rpc
#[derive(Clone)]
pub struct HttpNodeRpc {
    http: Client,
}

impl HttpNodeRpc {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { http })
    }

    async fn call(&self, node: &NodeEndpoint, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 10,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&node.url)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_server_error() {
            return Err(Error::Network(format!("{} returned {}", node.url, response.status())));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(Error::Rpc(error.describe()));
        }
        body.result
            .ok_or_else(|| Error::Rpc(format!("{}: no result in response", method)))
    }

    async fn call_keys<T: for<'de> Deserialize<'de>>(
        &self,
        node: &NodeEndpoint,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let result = self.call(node, method, params).await?;
        let parsed: KeysResult<T> =
            serde_json::from_value(result).map_err(|e| Error::Rpc(e.to_string()))?;
        parsed
            .keys
            .into_iter()
            .next()
            .ok_or_else(|| Error::Rpc(format!("{}: empty key list", method)))
    }
}

#[async_trait]
impl NodeRpc for HttpNodeRpc {
    async fn key_lookup(
        &self,
        node: &NodeEndpoint,
        verifier: &str,
        verifier_id: &str,
    ) -> Result<LookupReply> {
        let params = json!({ "verifier": verifier, "verifier_id": verifier_id });
        match self
            .call_keys::<LookupKey>(node, "VerifierLookupRequest", params)
            .await
        {
            Ok(key) => Ok(LookupReply::Found(key)),
            Err(Error::Rpc(message)) if message.contains(NOT_ASSIGNED) => Ok(LookupReply::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn key_assign(
        &self,
        node: &NodeEndpoint,
        verifier: &str,
        verifier_id: &str,
    ) -> Result<()> {
        let params = json!({ "verifier": verifier, "verifier_id": verifier_id });
        self.call(node, "KeyAssign", params).await.map(|_| ())
    }

    async fn commitment_request(
        &self,
        node: &NodeEndpoint,
        commitment: &Commitment,
    ) -> Result<NodeSignature> {
        let params = json!({
            "messageprefix": Commitment::PREFIX,
            "tokencommitment": commitment.token_commitment,
            "temppubx": commitment.temp_pub_x,
            "temppuby": commitment.temp_pub_y,
            "timestamp": commitment.timestamp.to_string(),
            "verifieridentifier": commitment.verifier,
        });
        let result = self.call(node, "CommitmentRequest", params).await?;
        let signed: SignatureResult =
            serde_json::from_value(result).map_err(|e| Error::Rpc(e.to_string()))?;
        Ok(NodeSignature {
            node_index: node.index,
            data: signed.data,
            signature: signed.signature,
            node_pub_x: signed.nodepubx,
            node_pub_y: signed.nodepuby,
        })
    }

    async fn share_request(
        &self,
        node: &NodeEndpoint,
        request: &ShareRequest,
    ) -> Result<EncryptedShare> {
        self.call_keys(node, "ShareRequest", share_request_params(request)?)
            .await
    }
}

fn share_request_params(request: &ShareRequest) -> Result<Value> {
    let mut item = Map::new();
    if let Value::Object(extra) = &request.extra_params {
        item.extend(extra.clone());
    }
    item.insert("verifieridentifier".into(), json!(request.verifier));
    item.insert("verifier_id".into(), json!(request.verifier_id));
    item.insert("idtoken".into(), json!(request.id_token));
    item.insert(
        "nodesignatures".into(),
        serde_json::to_value(&request.node_signatures).map_err(|e| Error::Rpc(e.to_string()))?,
    );
    Ok(json!({ "encrypted": "yes", "item": [Value::Object(item)] }))
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
    #[serde(default)]
    message: String,
}

/// [`MetadataService`] over http
#[derive(Clone)]
pub struct HttpMetadata {
    url: String,
    http: Client,
}

impl HttpMetadata {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl MetadataService for HttpMetadata {
    async fn get_nonce(&self, pub_key_x: &str, pub_key_y: &str) -> Result<Nonce> {
        let response = self
            .http
            .post(format!("{}/get", self.url))
            .json(&json!({ "pub_key_X": pub_key_x, "pub_key_Y": pub_key_y }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::Network(format!("metadata service returned {}", status)));
        }
        if !status.is_success() {
            return Err(Error::Metadata(format!("metadata service returned {}", status)));
        }

        let body: NonceResponse = response
            .json()
            .await
            .map_err(|e| Error::Metadata(e.to_string()))?;
        Nonce::from_hex(&body.message).map_err(|e| Error::Metadata(e.to_string()))
    }
}
