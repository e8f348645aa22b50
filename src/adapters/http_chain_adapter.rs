//! Chain gateway client over HTTP.
//!
//! Each call is a signed JSON envelope with a client-generated request id.
//! Once the envelope may have reached the gateway, any lost or garbled reply
//! (timeout, broken body, 5xx) is resolved by looking the request id up,
//! never by sending the envelope again.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::chain::{
    CONTRACT_ABI_VERSION, CallArg, ChainReceipt, CoinType, ContractCall, ContractObjects, TxStatus,
};
use crate::domain::config_validation::{DEFAULT_TIMEOUT_SECS, contract_objects};
use crate::domain::error::BondError;
use crate::domain::indexer::EventPage;
use crate::domain::vault::CustodialSigner;
use crate::ports::chain_port::ChainPort;
use crate::ports::config_port::ConfigPort;

/// The signed part of an envelope. Field order is the canonical order.
#[derive(Serialize)]
struct UnsignedCall<'a> {
    abi_version: u32,
    method: &'a str,
    request_id: &'a str,
    sender: &'a str,
    args: &'a [CallArg],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub abi_version: u32,
    pub method: String,
    pub request_id: String,
    pub sender: String,
    pub args: Vec<CallArg>,
    pub public_key: String,
    pub signature: String,
}

impl SignedEnvelope {
    /// SHA-256 of the canonical JSON of everything but the key and signature.
    pub fn signing_digest(&self) -> Result<[u8; 32], BondError> {
        let unsigned = UnsignedCall {
            abi_version: self.abi_version,
            method: &self.method,
            request_id: &self.request_id,
            sender: &self.sender,
            args: &self.args,
        };
        let bytes = serde_json::to_vec(&unsigned)
            .map_err(|e| BondError::chain(&self.method, format!("envelope encoding: {e}")))?;
        Ok(Sha256::digest(bytes).into())
    }
}

pub fn build_envelope(
    signer: &CustodialSigner,
    call: &ContractCall,
    objects: &ContractObjects,
    request_id: &str,
) -> Result<SignedEnvelope, BondError> {
    let mut envelope = SignedEnvelope {
        abi_version: CONTRACT_ABI_VERSION,
        method: call.method().to_string(),
        request_id: request_id.to_string(),
        sender: signer.address().to_string(),
        args: call.arguments(objects),
        public_key: signer.public_key_hex(),
        signature: String::new(),
    };
    envelope.signature = signer.sign_hex(&envelope.signing_digest()?);
    Ok(envelope)
}

#[derive(Debug, Deserialize)]
struct TxReply {
    status: String,
    digest: Option<String>,
    object_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceReply {
    balance: u64,
}

fn parse_reply(method: &str, request_id: &str, reply: TxReply) -> Result<TxStatus, BondError> {
    match reply.status.as_str() {
        "confirmed" => {
            let digest = reply
                .digest
                .filter(|d| !d.is_empty())
                .ok_or_else(|| BondError::chain(method, "confirmed reply without digest"))?;
            Ok(TxStatus::Confirmed(ChainReceipt {
                digest,
                request_id: request_id.to_string(),
                object_id: reply.object_id,
            }))
        }
        "failed" => Ok(TxStatus::Failed(
            reply.error.unwrap_or_else(|| "no reason given".to_string()),
        )),
        "pending" | "unknown" => Ok(TxStatus::Unknown),
        other => Err(BondError::chain(method, format!("unexpected status {other:?}"))),
    }
}

pub struct HttpChainAdapter {
    client: Client,
    endpoint: String,
    objects: ContractObjects,
}

impl HttpChainAdapter {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        objects: ContractObjects,
    ) -> Result<Self, BondError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BondError::chain("connect", e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            objects,
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BondError> {
        let endpoint = config.require_string("chain", "endpoint")?;
        let timeout = config.get_u64("chain", "timeout_secs", DEFAULT_TIMEOUT_SECS)?;
        Self::new(
            &endpoint,
            Duration::from_secs(timeout),
            contract_objects(config)?,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn read_reply(method: &str, request_id: &str, response: Response) -> Result<TxStatus, BondError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BondError::chain(method, format!("gateway returned {status}: {body}")));
        }
        let reply: TxReply = response
            .json()
            .map_err(|e| BondError::chain(method, format!("malformed reply: {e}")))?;
        parse_reply(method, request_id, reply)
    }

    /// Reads the reply to a submit. `None` means the envelope may have landed
    /// but the reply cannot say whether it did.
    fn read_submit_reply(
        method: &str,
        request_id: &str,
        response: Response,
    ) -> Result<Option<TxStatus>, BondError> {
        let status = response.status();
        if status.is_server_error() {
            tracing::warn!(method, request_id, %status, "gateway error after submit");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BondError::chain(method, format!("gateway returned {status}: {body}")));
        }
        let parsed = response
            .json::<TxReply>()
            .map_err(|e| BondError::chain(method, format!("malformed reply: {e}")))
            .and_then(|reply| parse_reply(method, request_id, reply));
        match parsed {
            Ok(tx) => Ok(Some(tx)),
            Err(e) => {
                tracing::warn!(method, request_id, error = %e, "unreadable submit reply");
                Ok(None)
            }
        }
    }

    /// Settles an unknown outcome by request id.
    fn resolve(&self, method: &str, request_id: &str) -> Result<ChainReceipt, BondError> {
        match self.transaction_status(request_id) {
            Ok(TxStatus::Confirmed(receipt)) => Ok(receipt),
            Ok(TxStatus::Failed(reason)) => Err(BondError::chain(method, reason)),
            Ok(TxStatus::Unknown) => Err(BondError::ChainUnknownOutcome {
                method: method.to_string(),
                request_id: request_id.to_string(),
            }),
            Err(e) => {
                tracing::warn!(method, request_id, error = %e, "status lookup failed");
                Err(BondError::ChainUnknownOutcome {
                    method: method.to_string(),
                    request_id: request_id.to_string(),
                })
            }
        }
    }
}

impl ChainPort for HttpChainAdapter {
    fn submit(
        &self,
        signer: &CustodialSigner,
        call: &ContractCall,
    ) -> Result<ChainReceipt, BondError> {
        let method = call.method();
        let request_id = uuid::Uuid::now_v7().to_string();
        let envelope = build_envelope(signer, call, &self.objects, &request_id)?;

        tracing::debug!(method, request_id = %request_id, sender = signer.address(), "submitting");
        let sent = self
            .client
            .post(self.url("/v1/transactions"))
            .json(&envelope)
            .send();

        let status = match sent {
            Ok(response) => Self::read_submit_reply(method, &request_id, response)?,
            // Never left the client.
            Err(e) if e.is_connect() || e.is_builder() => {
                return Err(BondError::chain(method, e.to_string()));
            }
            Err(e) => {
                tracing::warn!(method, request_id = %request_id, error = %e, "submit reply lost; querying status");
                None
            }
        };

        match status {
            Some(TxStatus::Confirmed(receipt)) => {
                tracing::info!(method, digest = %receipt.digest, "transaction confirmed");
                Ok(receipt)
            }
            Some(TxStatus::Failed(reason)) => Err(BondError::chain(method, reason)),
            Some(TxStatus::Unknown) | None => self.resolve(method, &request_id),
        }
    }

    fn get_balance(&self, address: &str, coin: CoinType) -> Result<u64, BondError> {
        let url = reqwest::Url::parse_with_params(
            &self.url(&format!("/v1/balances/{address}")),
            &[("coin", coin.as_str())],
        )
        .map_err(|e| BondError::chain("get_balance", e.to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| BondError::chain("get_balance", e.to_string()))?;
        if !response.status().is_success() {
            return Err(BondError::chain(
                "get_balance",
                format!("gateway returned {}", response.status()),
            ));
        }
        let reply: BalanceReply = response
            .json()
            .map_err(|e| BondError::chain("get_balance", format!("malformed reply: {e}")))?;
        Ok(reply.balance)
    }

    fn transaction_status(&self, request_id: &str) -> Result<TxStatus, BondError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/transactions/{request_id}")))
            .send()
            .map_err(|e| BondError::chain("transaction_status", e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(TxStatus::Unknown);
        }
        Self::read_reply("transaction_status", request_id, response)
    }

    fn poll_events(&self, cursor: Option<&str>, limit: usize) -> Result<EventPage, BondError> {
        let limit = limit.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let url = reqwest::Url::parse_with_params(&self.url("/v1/events"), &query)
            .map_err(|e| BondError::chain("poll_events", e.to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| BondError::chain("poll_events", e.to_string()))?;
        if !response.status().is_success() {
            return Err(BondError::chain(
                "poll_events",
                format!("gateway returned {}", response.status()),
            ));
        }
        response
            .json()
            .map_err(|e| BondError::chain("poll_events", format!("malformed reply: {e}")))
    }
}
