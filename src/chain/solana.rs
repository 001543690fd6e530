use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use solana_client::{
    client_error::{ClientError, ClientErrorKind, Result as ClientResult},
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{CommitmentConfig, RpcSendTransactionConfig, RpcTransactionConfig, UiTransactionEncoding},
    rpc_custom_error::{
        JSON_RPC_SERVER_ERROR_BLOCK_NOT_AVAILABLE, JSON_RPC_SERVER_ERROR_BLOCK_STATUS_NOT_AVAILABLE_YET,
        JSON_RPC_SERVER_ERROR_LONG_TERM_STORAGE_SLOT_SKIPPED, JSON_RPC_SERVER_ERROR_MIN_CONTEXT_SLOT_NOT_REACHED,
        JSON_RPC_SERVER_ERROR_NODE_UNHEALTHY, JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE,
        JSON_RPC_SERVER_ERROR_SLOT_SKIPPED,
    },
    rpc_request::{RpcError, RpcRequest, RpcResponseErrorData},
    rpc_response::{
        EncodedTransactionWithStatusMeta, OptionSerializer, TransactionConfirmationStatus, TransactionError,
    },
};
use solana_sdk::{signature::Signature, transaction::Transaction as SignedTransaction};
use std::future::Future;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::*;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::models::{AccountRef, SignatureRef};

#[derive(Debug, Clone)]
pub struct SolanaRpcConfig {
    pub rpc_url: String,
    /// Client-side cap on outbound requests
    pub requests_per_second: u32,
    pub request_timeout: Duration,
    /// Commitment used for reads and the blockhash anchor
    pub read_commitment: Commitment,
}

impl Default for SolanaRpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://rpc.ankr.com/solana_devnet".to_string(),
            requests_per_second: 10,
            request_timeout: Duration::from_secs(30),
            read_commitment: Commitment::Confirmed,
        }
    }
}

impl From<Commitment> for CommitmentConfig {
    fn from(commitment: Commitment) -> Self {
        match commitment {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// Solana JSON-RPC client.
///
/// Every request first waits on a shared token bucket so concurrent detail
/// fetches cannot exceed the provider's request budget.
pub struct SolanaRpcClient {
    rpc: RpcClient,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    commitment: CommitmentConfig,
}

impl SolanaRpcClient {
    pub fn new(config: SolanaRpcConfig) -> Self {
        let commitment = CommitmentConfig::from(config.read_commitment);
        let rpc = RpcClient::new_with_timeout_and_commitment(
            config.rpc_url,
            config.request_timeout,
            commitment,
        );

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            rpc,
            limiter,
            commitment,
        }
    }

    /// Wait for a rate-limit slot, then run `request`.
    async fn call<T, F>(&self, method: &'static str, request: F) -> LedgerResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        self.limiter.until_ready().await;
        debug!("→ {}", method);
        request.await.map_err(|e| classify_client_error(method, e))
    }
}

#[async_trait]
impl LedgerClient for SolanaRpcClient {
    async fn signatures_for_address(
        &self,
        account: &AccountRef,
        before: Option<&SignatureRef>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: before.map(parse_signature).transpose()?,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };

        let page = self
            .call(
                "getSignaturesForAddress",
                self.rpc
                    .get_signatures_for_address_with_config(account.pubkey(), config),
            )
            .await?;

        Ok(page
            .into_iter()
            .map(|entry| SignatureInfo {
                signature: SignatureRef::new(entry.signature),
                slot: entry.slot,
                block_time: entry.block_time,
                failed: entry.err.is_some(),
            })
            .collect())
    }

    async fn transaction_detail(
        &self,
        signature: &SignatureRef,
    ) -> LedgerResult<Option<TransactionDetail>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        // `null` means the ledger does not know the signature yet
        let raw: Option<ConfirmedTransaction> = self
            .call(
                "getTransaction",
                self.rpc.send(
                    RpcRequest::GetTransaction,
                    json!([signature.as_str(), config]),
                ),
            )
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let meta = raw.transaction.meta.ok_or_else(|| {
            LedgerError::InvalidResponse(format!("transaction {} has no status meta", signature))
        })?;
        let decoded = raw.transaction.transaction.decode().ok_or_else(|| {
            LedgerError::InvalidResponse(format!("transaction {} did not decode", signature))
        })?;

        // Balances follow static keys, then loaded writable, then loaded readonly.
        let mut account_keys: Vec<String> = decoded
            .message
            .static_account_keys()
            .iter()
            .map(ToString::to_string)
            .collect();
        if let OptionSerializer::Some(loaded) = meta.loaded_addresses {
            account_keys.extend(loaded.writable);
            account_keys.extend(loaded.readonly);
        }

        Ok(Some(TransactionDetail {
            signature: signature.clone(),
            slot: raw.slot,
            block_time: raw.block_time,
            account_keys,
            pre_balances: meta.pre_balances,
            post_balances: meta.post_balances,
            fee: meta.fee,
        }))
    }

    async fn balance(&self, account: &AccountRef) -> LedgerResult<u64> {
        let response = self
            .call(
                "getBalance",
                self.rpc
                    .get_balance_with_commitment(account.pubkey(), self.commitment),
            )
            .await?;
        Ok(response.value)
    }

    async fn latest_anchor(&self) -> LedgerResult<Anchor> {
        let (blockhash, last_valid_block_height) = self
            .call(
                "getLatestBlockhash",
                self.rpc.get_latest_blockhash_with_commitment(self.commitment),
            )
            .await?;

        Ok(Anchor {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn submit(&self, transaction: &SignedTransaction) -> LedgerResult<SignatureRef> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .call(
                SEND_TRANSACTION,
                self.rpc.send_transaction_with_config(transaction, config),
            )
            .await?;
        Ok(SignatureRef::new(signature.to_string()))
    }

    async fn signature_status(
        &self,
        signature: &SignatureRef,
    ) -> LedgerResult<Option<SignatureStatus>> {
        let parsed = parse_signature(signature)?;
        let response = self
            .call(
                "getSignatureStatuses",
                self.rpc.get_signature_statuses_with_history(&[parsed]),
            )
            .await?;

        let status = response.value.into_iter().next().flatten();
        Ok(status.map(|s| SignatureStatus {
            slot: s.slot,
            commitment: s.confirmation_status.map(|c| match c {
                TransactionConfirmationStatus::Processed => Commitment::Processed,
                TransactionConfirmationStatus::Confirmed => Commitment::Confirmed,
                TransactionConfirmationStatus::Finalized => Commitment::Finalized,
            }),
            err: s.err.map(|e| e.to_string()),
        }))
    }

    async fn block_height(&self) -> LedgerResult<u64> {
        self.call(
            "getBlockHeight",
            self.rpc.get_block_height_with_commitment(self.commitment),
        )
        .await
    }
}

const SEND_TRANSACTION: &str = "sendTransaction";

/// `getTransaction` result, nullable at the top level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmedTransaction {
    slot: u64,
    #[serde(flatten)]
    transaction: EncodedTransactionWithStatusMeta,
    #[serde(default)]
    block_time: Option<i64>,
}

fn parse_signature(signature: &SignatureRef) -> LedgerResult<Signature> {
    Signature::from_str(signature.as_str())
        .map_err(|e| LedgerError::InvalidResponse(format!("malformed signature {}: {}", signature, e)))
}

/// Map a client failure onto the ledger error taxonomy.
pub(crate) fn classify_client_error(method: &str, error: ClientError) -> LedgerError {
    match *error.kind {
        ClientErrorKind::Reqwest(e) => match e.status() {
            Some(status) => classify_http_status(method, status.as_u16()),
            None if e.is_decode() => {
                LedgerError::InvalidResponse(format!("{} body did not decode: {}", method, e))
            }
            None => LedgerError::TransientNetwork(format!("{} request failed: {}", method, e)),
        },
        ClientErrorKind::Io(e) => LedgerError::TransientNetwork(format!("{}: {}", method, e)),
        ClientErrorKind::Middleware(e) => LedgerError::TransientNetwork(format!("{}: {}", method, e)),
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            code,
            message,
            data,
        }) => {
            let logs = match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(simulation) => {
                    simulation.logs.unwrap_or_default()
                }
                _ => Vec::new(),
            };
            classify_rpc_error(method, code, message, logs)
        }
        ClientErrorKind::RpcError(e) => {
            LedgerError::InvalidResponse(format!("{} failed: {}", method, e))
        }
        ClientErrorKind::SerdeJson(e) => {
            LedgerError::InvalidResponse(format!("{} result did not decode: {}", method, e))
        }
        ClientErrorKind::TransactionError(TransactionError::BlockhashNotFound) => {
            LedgerError::AnchorExpired
        }
        ClientErrorKind::TransactionError(e) => LedgerError::SubmissionRejected {
            message: e.to_string(),
            logs: Vec::new(),
        },
        ClientErrorKind::SigningError(e) => LedgerError::Signer(e.to_string()),
        ClientErrorKind::Custom(message) => {
            LedgerError::InvalidResponse(format!("{}: {}", method, message))
        }
    }
}

fn classify_http_status(method: &str, status: u16) -> LedgerError {
    if status == 429 || (500..600).contains(&status) {
        warn!("{} throttled or failed upstream: HTTP {}", method, status);
        LedgerError::TransientNetwork(format!("{} returned HTTP {}", method, status))
    } else {
        LedgerError::InvalidResponse(format!("{} returned HTTP {}", method, status))
    }
}

fn classify_rpc_error(method: &str, code: i64, message: String, logs: Vec<String>) -> LedgerError {
    if message.contains("Blockhash not found") {
        return LedgerError::AnchorExpired;
    }

    match code {
        JSON_RPC_SERVER_ERROR_NODE_UNHEALTHY
        | JSON_RPC_SERVER_ERROR_BLOCK_NOT_AVAILABLE
        | JSON_RPC_SERVER_ERROR_SLOT_SKIPPED
        | JSON_RPC_SERVER_ERROR_LONG_TERM_STORAGE_SLOT_SKIPPED
        | JSON_RPC_SERVER_ERROR_BLOCK_STATUS_NOT_AVAILABLE_YET
        | JSON_RPC_SERVER_ERROR_MIN_CONTEXT_SLOT_NOT_REACHED => {
            LedgerError::TransientNetwork(format!("{}: {}", method, message))
        }
        JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE => {
            LedgerError::SubmissionRejected { message, logs }
        }
        _ if method == SEND_TRANSACTION => LedgerError::SubmissionRejected { message, logs },
        code => LedgerError::InvalidResponse(format!("{} failed ({}): {}", method, code, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{header, StatusCode},
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde_json::Value;
    use solana_sdk::{message::Message, pubkey::Pubkey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    type Reply = Box<dyn Fn(&Value) -> Response + Send + Sync>;

    /// Local JSON-RPC endpoint answering every call with `reply`.
    struct StubRpc {
        hits: AtomicUsize,
        delay: Option<Duration>,
        reply: Reply,
    }

    impl StubRpc {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn handle(State(stub): State<Arc<StubRpc>>, Json(body): Json<Value>) -> Response {
        stub.hits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = stub.delay {
            tokio::time::sleep(delay).await;
        }
        (stub.reply)(&body)
    }

    async fn serve(
        delay: Option<Duration>,
        reply: impl Fn(&Value) -> Response + Send + Sync + 'static,
    ) -> (String, Arc<StubRpc>) {
        let stub = Arc::new(StubRpc {
            hits: AtomicUsize::new(0),
            delay,
            reply: Box::new(reply),
        });
        let app = Router::new().route("/", post(handle)).with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), stub)
    }

    fn client(url: String) -> SolanaRpcClient {
        SolanaRpcClient::new(SolanaRpcConfig {
            rpc_url: url,
            requests_per_second: 100,
            request_timeout: Duration::from_secs(5),
            read_commitment: Commitment::Confirmed,
        })
    }

    fn ok(request: &Value, result: Value) -> Response {
        Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result })).into_response()
    }

    fn rpc_failure(request: &Value, code: i64, message: &str, data: Value) -> Response {
        Json(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": code, "message": message, "data": data },
        }))
        .into_response()
    }

    fn account() -> AccountRef {
        AccountRef::from(Pubkey::new_from_array([4; 32]))
    }

    fn transfer_transaction() -> SignedTransaction {
        let from = Pubkey::new_from_array([4; 32]);
        let to = Pubkey::new_from_array([5; 32]);
        let ix = solana_system_interface::instruction::transfer(&from, &to, 1_000);
        SignedTransaction::new_unsigned(Message::new(&[ix], Some(&from)))
    }

    #[tokio::test]
    async fn test_balance_reads_context_value() {
        let (url, stub) = serve(None, |req| {
            assert_eq!(req["method"], "getBalance");
            assert_eq!(req["params"][1]["commitment"], "confirmed");
            ok(req, json!({ "context": { "slot": 1 }, "value": 42 }))
        })
        .await;

        assert_eq!(client(url).balance(&account()).await.unwrap(), 42);
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn test_throttled_response_is_transient() {
        let (url, _stub) = serve(None, |_| {
            (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")], "slow down").into_response()
        })
        .await;

        let err = client(url).balance(&account()).await.unwrap_err();
        assert!(matches!(err, LedgerError::TransientNetwork(_)), "{:?}", err);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (url, _stub) =
            serve(None, |_| (StatusCode::BAD_GATEWAY, "upstream down").into_response()).await;

        let err = client(url).block_height().await.unwrap_err();
        assert!(matches!(err, LedgerError::TransientNetwork(_)), "{:?}", err);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_status_is_not_retried() {
        let (url, stub) =
            serve(None, |_| (StatusCode::FORBIDDEN, "api key required").into_response()).await;

        let err = client(url).balance(&account()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidResponse(_)), "{:?}", err);
        assert!(!err.is_retryable());
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn test_request_timeout_is_transient() {
        let (url, _stub) = serve(Some(Duration::from_secs(2)), |req| ok(req, json!(7))).await;
        let client = SolanaRpcClient::new(SolanaRpcConfig {
            rpc_url: url,
            request_timeout: Duration::from_millis(200),
            ..SolanaRpcConfig::default()
        });

        let err = client.block_height().await.unwrap_err();
        assert!(matches!(err, LedgerError::TransientNetwork(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_unhealthy_node_is_transient() {
        let (url, _stub) = serve(None, |req| {
            rpc_failure(
                req,
                JSON_RPC_SERVER_ERROR_NODE_UNHEALTHY,
                "Node is behind by 42 slots",
                json!({ "numSlotsBehind": 42 }),
            )
        })
        .await;

        let err = client(url).block_height().await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_preflight_failure_carries_logs() {
        let (url, _stub) = serve(None, |req| {
            assert_eq!(req["method"], "sendTransaction");
            assert_eq!(req["params"][1]["encoding"], "base64");
            rpc_failure(
                req,
                JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE,
                "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x1",
                json!({
                    "err": { "InstructionError": [0, { "Custom": 1 }] },
                    "logs": [
                        "Program 11111111111111111111111111111111 invoke [1]",
                        "Transfer: insufficient lamports 10, need 1000",
                    ],
                }),
            )
        })
        .await;

        let err = client(url).submit(&transfer_transaction()).await.unwrap_err();
        match err {
            LedgerError::SubmissionRejected { message, logs } => {
                assert!(message.contains("simulation failed"));
                assert_eq!(logs.len(), 2);
                assert!(logs[1].contains("insufficient lamports"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blockhash_not_found_is_anchor_expired() {
        let (url, _stub) = serve(None, |req| {
            rpc_failure(
                req,
                JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE,
                "Transaction simulation failed: Blockhash not found",
                json!({ "err": "BlockhashNotFound", "logs": [] }),
            )
        })
        .await;

        let err = client(url).submit(&transfer_transaction()).await.unwrap_err();
        assert!(matches!(err, LedgerError::AnchorExpired), "{:?}", err);
    }

    #[tokio::test]
    async fn test_limiter_spaces_requests() {
        let (url, stub) = serve(None, |req| ok(req, json!(7))).await;
        let client = SolanaRpcClient::new(SolanaRpcConfig {
            rpc_url: url,
            requests_per_second: 2,
            ..SolanaRpcConfig::default()
        });

        let started = Instant::now();
        for _ in 0..4 {
            assert_eq!(client.block_height().await.unwrap(), 7);
        }

        // two go out on the initial burst, the rest wait 500ms each
        assert!(started.elapsed() >= Duration::from_millis(900), "{:?}", started.elapsed());
        assert_eq!(stub.hits(), 4);
    }

    #[tokio::test]
    async fn test_transaction_detail_projects_keys_and_balances() {
        let tx = transfer_transaction();
        let wire = BASE64.encode(bincode::serialize(&tx).unwrap());
        let (url, _stub) = serve(None, move |req| {
            assert_eq!(req["method"], "getTransaction");
            assert_eq!(req["params"][1]["maxSupportedTransactionVersion"], 0);
            ok(
                req,
                json!({
                    "slot": 250,
                    "blockTime": 1_700_000_000,
                    "meta": {
                        "err": null,
                        "status": { "Ok": null },
                        "fee": 5000,
                        "preBalances": [2_000_000_000u64, 0, 1],
                        "postBalances": [1_999_994_000u64, 1_000, 1],
                        "loadedAddresses": { "writable": [], "readonly": [] },
                    },
                    "transaction": [wire, "base64"],
                    "version": "legacy",
                }),
            )
        })
        .await;

        let sig = SignatureRef::new(Signature::default().to_string());
        let detail = client(url).transaction_detail(&sig).await.unwrap().unwrap();
        assert_eq!(detail.slot, 250);
        assert_eq!(detail.block_time, Some(1_700_000_000));
        assert_eq!(detail.account_keys.len(), 3);
        assert_eq!(detail.account_keys[0], Pubkey::new_from_array([4; 32]).to_string());
        assert_eq!(detail.account_keys[1], Pubkey::new_from_array([5; 32]).to_string());
        assert_eq!(detail.post_balances[1], 1_000);
        assert_eq!(detail.fee, 5000);
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_none() {
        let (url, _stub) = serve(None, |req| ok(req, Value::Null)).await;
        let sig = SignatureRef::new(Signature::default().to_string());
        assert!(client(url).transaction_detail(&sig).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signature_status_maps_confirmation_level() {
        let (url, _stub) = serve(None, |req| {
            assert_eq!(req["params"][1]["searchTransactionHistory"], true);
            ok(
                req,
                json!({
                    "context": { "slot": 9 },
                    "value": [{
                        "slot": 8,
                        "confirmations": null,
                        "status": { "Ok": null },
                        "err": null,
                        "confirmationStatus": "finalized",
                    }],
                }),
            )
        })
        .await;

        let sig = SignatureRef::new(Signature::default().to_string());
        let status = client(url).signature_status(&sig).await.unwrap().unwrap();
        assert_eq!(status.slot, 8);
        assert_eq!(status.commitment, Some(Commitment::Finalized));
        assert!(status.err.is_none());
    }
}
