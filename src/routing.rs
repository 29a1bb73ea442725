//! The routing-oracle REST client.
//!
//! A thin HTTP client over the external routing service. Quotes come in
//! three flavors: `fromAmount`-based, `toAmount`-based (the merchant amount
//! is exact and the payer amount is derived), and `toAmount`-based with an
//! array of post-bridge contract calls, whose returned route terminates in a
//! `settleFromBridge` invocation on the settlement router. After the source
//! transaction is broadcast, `status` is polled until the transfer reaches a
//! terminal state.
//!
//! Every request carries the configured integrator identifier. Quote
//! requests time out after fifteen seconds.

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_rpc_types_eth::TransactionRequest;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use alloy_network::TransactionBuilder;

use abipago_types::chain::ChainRef;

/// Quote requests are abandoned after this long.
pub const QUOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// Failures surfaced by the routing oracle.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// The oracle has no route for the requested transfer. Surfaced to the
    /// user with guidance to ask the merchant for a different token.
    #[error("no route available for the requested transfer")]
    NoRoute,
    /// The token or chain is deny-listed by the oracle.
    #[error("transfer denied by the routing oracle: {0}")]
    Denied(String),
    /// The quote request timed out. Retryable.
    #[error("quote request timed out")]
    Timeout,
    /// Any other non-success response.
    #[error("routing oracle returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The oracle response did not decode into the expected shape.
    #[error("malformed oracle payload: {0}")]
    Payload(String),
}

/// `fromAmount`-based quote parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub from_chain: ChainRef,
    pub from_token: Address,
    pub from_address: Address,
    pub to_chain: ChainRef,
    pub to_token: Address,
    pub to_address: Address,
    pub from_amount: String,
    pub slippage: f64,
}

/// `toAmount`-based quote parameters: the merchant amount is exact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToAmountQuoteRequest {
    pub from_chain: ChainRef,
    pub from_token: Address,
    pub from_address: Address,
    pub to_chain: ChainRef,
    pub to_token: Address,
    pub to_address: Address,
    pub to_amount: String,
    pub slippage: f64,
}

/// A post-bridge contract call injected into a contract-calls quote.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCall {
    /// Amount of `from_token_address` the call consumes.
    pub from_amount: String,
    pub from_token_address: Address,
    pub to_contract_address: Address,
    /// Hex-encoded calldata of the terminal call.
    pub to_contract_call_data: String,
    pub to_contract_gas_limit: String,
}

/// `toAmount`-based quote with post-bridge contract calls. Tokens that fail
/// the terminal call are diverted to `to_fallback_address`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCallsQuoteRequest {
    pub from_chain: ChainRef,
    pub from_token: Address,
    pub from_address: Address,
    pub to_chain: ChainRef,
    pub to_token: Address,
    pub to_amount: String,
    pub to_fallback_address: Address,
    pub contract_calls: Vec<ContractCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage: Option<f64>,
    pub integrator: String,
}

/// A routed step: estimates plus a ready-to-sign transaction payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStep {
    /// The bridge/DEX tool the oracle selected.
    pub tool: String,
    pub estimate: QuoteEstimate,
    pub transaction_request: OracleTransactionRequest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteEstimate {
    pub from_amount: String,
    pub to_amount: String,
    #[serde(default)]
    pub to_amount_min: Option<String>,
    #[serde(default)]
    pub execution_duration: Option<f64>,
}

/// The pre-built source-chain transaction returned with every quote.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleTransactionRequest {
    pub to: Address,
    /// 0x-prefixed calldata.
    pub data: String,
    /// 0x-prefixed hex value, absent for pure ERC-20 sends.
    #[serde(default)]
    pub value: Option<String>,
    pub chain_id: u64,
    #[serde(default)]
    pub gas_limit: Option<String>,
}

impl OracleTransactionRequest {
    /// Converts the oracle payload into a signable transaction request.
    pub fn to_transaction(&self) -> Result<TransactionRequest, RoutingError> {
        let data = Bytes::from_str(&self.data)
            .map_err(|err| RoutingError::Payload(format!("bad calldata: {err}")))?;
        let mut tx = TransactionRequest::default()
            .with_to(self.to)
            .with_input(data)
            .with_chain_id(self.chain_id);
        if let Some(value) = &self.value {
            let value = U256::from_str(value)
                .map_err(|err| RoutingError::Payload(format!("bad value: {err}")))?;
            tx = tx.with_value(value);
        }
        if let Some(gas_limit) = &self.gas_limit {
            let gas_limit = U256::from_str(gas_limit)
                .map_err(|err| RoutingError::Payload(format!("bad gas limit: {err}")))?;
            tx = tx.with_gas_limit(gas_limit.saturating_to());
        }
        Ok(tx)
    }
}

/// Terminal and non-terminal bridge transfer states.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeStatusCode {
    NotFound,
    Invalid,
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub status: BridgeStatusCode,
    #[serde(default)]
    pub substatus: Option<String>,
    /// Destination-chain leg, populated once the transfer lands.
    #[serde(default)]
    pub receiving: Option<ReceivingLeg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivingLeg {
    #[serde(default)]
    pub tx_hash: Option<B256>,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// Parameters for the multi-route listing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesRequest {
    pub from_chain_id: ChainRef,
    pub from_token_address: Address,
    pub from_amount: String,
    pub to_chain_id: ChainRef,
    pub to_token_address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<Address>,
    pub options: RouteOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptions {
    pub slippage: f64,
    pub integrator: String,
}

/// One alternative route from the multi-route listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub id: String,
    pub from_amount: String,
    pub to_amount: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RouteListing {
    routes: Vec<RouteSummary>,
}

/// A chain listing entry from the oracle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleChain {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OracleChains {
    chains: Vec<OracleChain>,
}

/// A token listing entry from the oracle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleToken {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// HTTP client over the routing oracle.
#[derive(Clone)]
pub struct RoutingClient {
    http: reqwest::Client,
    base: Url,
    integrator: String,
}

impl RoutingClient {
    pub fn new(base: Url, integrator: impl Into<String>) -> Result<Self, RoutingError> {
        let http = reqwest::Client::builder()
            .timeout(QUOTE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base,
            integrator: integrator.into(),
        })
    }

    /// `fromAmount`-based quote.
    #[instrument(skip_all, err, fields(from = %request.from_chain, to = %request.to_chain))]
    pub async fn quote(&self, request: &QuoteRequest) -> Result<QuoteStep, RoutingError> {
        let response = self
            .http
            .get(self.endpoint("quote")?)
            .query(request)
            .query(&[("integrator", self.integrator.as_str())])
            .send()
            .await
            .map_err(wrap_timeout)?;
        expect_json(response).await
    }

    /// `toAmount`-based quote: the merchant amount is exact, the payer
    /// amount is derived.
    #[instrument(skip_all, err, fields(from = %request.from_chain, to = %request.to_chain))]
    pub async fn quote_to_amount(
        &self,
        request: &ToAmountQuoteRequest,
    ) -> Result<QuoteStep, RoutingError> {
        let response = self
            .http
            .get(self.endpoint("quote/toAmount")?)
            .query(request)
            .query(&[("integrator", self.integrator.as_str())])
            .send()
            .await
            .map_err(wrap_timeout)?;
        expect_json(response).await
    }

    /// `toAmount`-based quote whose route terminates in the supplied
    /// contract calls on the destination chain.
    #[instrument(skip_all, err, fields(from = %request.from_chain, to = %request.to_chain))]
    pub async fn quote_with_contract_calls(
        &self,
        request: &ContractCallsQuoteRequest,
    ) -> Result<QuoteStep, RoutingError> {
        let mut request = request.clone();
        request.integrator = self.integrator.clone();
        let response = self
            .http
            .post(self.endpoint("quote/contractCalls")?)
            .json(&request)
            .send()
            .await
            .map_err(wrap_timeout)?;
        expect_json(response).await
    }

    /// Lists alternative routes for a transfer without committing to one.
    #[instrument(skip_all, err, fields(from = %request.from_chain_id, to = %request.to_chain_id))]
    pub async fn routes(
        &self,
        request: &RoutesRequest,
    ) -> Result<Vec<RouteSummary>, RoutingError> {
        let mut request = request.clone();
        request.options.integrator = self.integrator.clone();
        let response = self
            .http
            .post(self.endpoint("advanced/routes")?)
            .json(&request)
            .send()
            .await
            .map_err(wrap_timeout)?;
        let listing: RouteListing = expect_json(response).await?;
        Ok(listing.routes)
    }

    /// Status of a bridge transfer identified by its source-chain
    /// transaction hash.
    #[instrument(skip_all, err, fields(tx = %tx_hash))]
    pub async fn status(
        &self,
        tx_hash: B256,
        from_chain: ChainRef,
        to_chain: ChainRef,
    ) -> Result<BridgeStatus, RoutingError> {
        let response = self
            .http
            .get(self.endpoint("status")?)
            .query(&[
                ("txHash", tx_hash.to_string()),
                ("fromChain", from_chain.to_string()),
                ("toChain", to_chain.to_string()),
                ("integrator", self.integrator.clone()),
            ])
            .send()
            .await
            .map_err(wrap_timeout)?;
        expect_json(response).await
    }

    /// Chains the oracle can route across.
    pub async fn chains(&self) -> Result<Vec<OracleChain>, RoutingError> {
        let response = self
            .http
            .get(self.endpoint("chains")?)
            .query(&[("integrator", self.integrator.as_str())])
            .send()
            .await?;
        let listing: OracleChains = expect_json(response).await?;
        Ok(listing.chains)
    }

    /// Tokens the oracle can route on `chain`.
    pub async fn tokens(&self, chain: ChainRef) -> Result<Vec<OracleToken>, RoutingError> {
        let response = self
            .http
            .get(self.endpoint("tokens")?)
            .query(&[
                ("chains", chain.to_string()),
                ("integrator", self.integrator.clone()),
            ])
            .send()
            .await?;
        let body: serde_json::Value = expect_json(response).await?;
        let tokens = body
            .get("tokens")
            .and_then(|tokens| tokens.get(chain.to_string()))
            .cloned()
            .ok_or_else(|| RoutingError::Payload(format!("no token listing for chain {chain}")))?;
        serde_json::from_value(tokens).map_err(|err| RoutingError::Payload(err.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, RoutingError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RoutingError::Payload("routing base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }
}

fn wrap_timeout(err: reqwest::Error) -> RoutingError {
    if err.is_timeout() {
        RoutingError::Timeout
    } else {
        RoutingError::Http(err)
    }
}

async fn expect_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RoutingError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(RoutingError::NoRoute);
    }
    if status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(RoutingError::Denied(body));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RoutingError::Status { status, body });
    }
    response
        .json()
        .await
        .map_err(|err| RoutingError::Payload(err.to_string()))
}
