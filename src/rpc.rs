//! Blocking JSON-RPC client for the handful of Solana methods the
//! workload consumes, plus the shared recent-blockhash cache.

use crate::solana::transaction::Transaction;
use crate::solana::{Hash, Pubkey};
use log::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::sleep;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a cached blockhash is served before a refetch.
pub const DEFAULT_BLOCKHASH_REFRESH: Duration = Duration::from_secs(3);

/// The closed set of RPC methods this client can issue.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RpcRequest {
    GetAccountInfo,
    GetBalance,
    GetRecentBlockhash,
    GetSignatureStatuses,
    SendTransaction,
}

impl fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let method = match self {
            RpcRequest::GetAccountInfo => "getAccountInfo",
            RpcRequest::GetBalance => "getBalance",
            RpcRequest::GetRecentBlockhash => "getRecentBlockhash",
            RpcRequest::GetSignatureStatuses => "getSignatureStatuses",
            RpcRequest::SendTransaction => "sendTransaction",
        };
        write!(f, "{}", method)
    }
}

impl RpcRequest {
    pub fn build_request_json(self, id: u64, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": format!("{}", self),
            "params": params,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitmentLevel {
    Processed,
    Confirmed,
}

impl CommitmentLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    RpcError { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Timeouts, connection failures, and server-side 5xx responses are
    /// worth retrying; structured RPC rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            ClientError::RpcError { .. } | ClientError::Malformed(_) => false,
        }
    }
}

/// Retry `f` on transient failures, up to `attempts` tries with a fixed
/// pause between them. Rejections pass through on the first occurrence.
pub fn retry<T>(
    attempts: usize,
    backoff: Duration,
    mut f: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut tries = 0;
    loop {
        match f() {
            Err(err) if err.is_transient() && tries + 1 < attempts => {
                tries += 1;
                debug!("transient rpc failure (attempt {}): {}", tries, err);
                sleep(backoff);
            }
            result => return result,
        }
    }
}

pub trait RpcSender: Send + Sync {
    fn send(&self, request: RpcRequest, params: Value) -> Result<Value, ClientError>;
}

pub struct HttpSender {
    client: reqwest::blocking::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpSender {
    pub fn new_with_timeout(url: String, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("build rpc http client");
        Self {
            client,
            url,
            request_id: AtomicU64::new(0),
        }
    }
}

impl RpcSender for HttpSender {
    fn send(&self, request: RpcRequest, params: Value) -> Result<Value, ClientError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request_json = request.build_request_json(id, params);
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request_json.to_string())
            .send()?
            .error_for_status()?;
        let json: Value = serde_json::from_str(&response.text()?)
            .map_err(|err| ClientError::Malformed(err.to_string()))?;
        if json["error"].is_object() {
            return Err(ClientError::RpcError {
                code: json["error"]["code"].as_i64().unwrap_or(-1),
                message: json["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(json["result"].clone())
    }
}

/// An `RpcSender` used for unit testing. Returns canned responses, with
/// per-method overrides installable through `add_mock`. A sender whose
/// url is "fails" rejects every request.
pub struct MockSender {
    mocks: RwLock<HashMap<RpcRequest, Value>>,
    url: String,
}

impl MockSender {
    pub fn new(url: String) -> Self {
        Self::new_with_mocks(url, HashMap::new())
    }

    pub fn new_with_mocks(url: String, mocks: HashMap<RpcRequest, Value>) -> Self {
        Self {
            mocks: RwLock::new(mocks),
            url,
        }
    }

    pub fn add_mock(&self, request: RpcRequest, value: Value) {
        self.mocks.write().unwrap().insert(request, value);
    }
}

impl RpcSender for MockSender {
    fn send(&self, request: RpcRequest, _params: Value) -> Result<Value, ClientError> {
        if self.url == "fails" {
            return Err(ClientError::RpcError {
                code: -32005,
                message: "Node is unhealthy".to_string(),
            });
        }
        if let Some(value) = self.mocks.read().unwrap().get(&request) {
            return Ok(value.clone());
        }
        let value = match request {
            RpcRequest::GetAccountInfo => json!({
                "context": {"slot": 1},
                "value": Value::Null,
            }),
            RpcRequest::GetBalance => json!({
                "context": {"slot": 1},
                "value": 1_000_000_000u64,
            }),
            RpcRequest::GetRecentBlockhash => json!({
                "context": {"slot": 1},
                "value": {
                    "blockhash": Hash::default().to_string(),
                    "feeCalculator": {"lamportsPerSignature": 5000},
                },
            }),
            RpcRequest::GetSignatureStatuses => json!({
                "context": {"slot": 1},
                "value": [{
                    "slot": 1,
                    "confirmations": 0,
                    "err": Value::Null,
                    "confirmationStatus": "processed",
                }],
            }),
            RpcRequest::SendTransaction => {
                json!(crate::solana::Signature::default().to_string())
            }
        };
        Ok(value)
    }
}

pub struct RpcClient {
    sender: Box<dyn RpcSender>,
}

impl RpcClient {
    pub fn new_with_timeout(url: String, timeout: Duration) -> Self {
        Self::new_sender(HttpSender::new_with_timeout(url, timeout))
    }

    pub fn new_sender<T: RpcSender + 'static>(sender: T) -> Self {
        Self {
            sender: Box::new(sender),
        }
    }

    pub fn new_mock(url: String) -> Self {
        Self::new_sender(MockSender::new(url))
    }

    fn send(&self, request: RpcRequest, params: Value) -> Result<Value, ClientError> {
        self.sender.send(request, params)
    }

    /// Raw account data for `pubkey`, or `None` if the account does not
    /// exist at the given commitment.
    pub fn get_account_data(
        &self,
        pubkey: &Pubkey,
        commitment: CommitmentLevel,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        let result = self.send(
            RpcRequest::GetAccountInfo,
            json!([pubkey.to_string(), {"encoding": "base64", "commitment": commitment.as_str()}]),
        )?;
        if result["value"].is_null() {
            return Ok(None);
        }
        let blob = result["value"]["data"][0]
            .as_str()
            .ok_or_else(|| ClientError::Malformed("account data is not a string".to_string()))?;
        let data = base64::decode(blob)
            .map_err(|err| ClientError::Malformed(format!("account data: {}", err)))?;
        Ok(Some(data))
    }

    pub fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, ClientError> {
        let result = self.send(RpcRequest::GetBalance, json!([pubkey.to_string()]))?;
        result["value"]
            .as_u64()
            .ok_or_else(|| ClientError::Malformed("balance is not a u64".to_string()))
    }

    pub fn get_recent_blockhash(&self) -> Result<Hash, ClientError> {
        let result = self.send(RpcRequest::GetRecentBlockhash, json!([]))?;
        let blockhash = result["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| ClientError::Malformed("blockhash is not a string".to_string()))?;
        blockhash
            .parse()
            .map_err(|_| ClientError::Malformed(format!("blockhash not base58: {}", blockhash)))
    }

    /// Fire-and-forget submission: the transaction is relayed without
    /// preflight and the signature string is returned without waiting for
    /// any confirmation.
    pub fn send_transaction(&self, transaction: &Transaction) -> Result<String, ClientError> {
        let encoded = base64::encode(transaction.serialize());
        let result = self.send(
            RpcRequest::SendTransaction,
            json!([encoded, {
                "skipPreflight": true,
                "preflightCommitment": CommitmentLevel::Processed.as_str(),
                "encoding": "base64",
            }]),
        )?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ClientError::Malformed("signature is not a string".to_string()))
    }

    /// Confirmation status of one signature, if the cluster has seen it.
    pub fn get_signature_status(&self, signature: &str) -> Result<Option<String>, ClientError> {
        let result = self.send(RpcRequest::GetSignatureStatuses, json!([[signature]]))?;
        let status = &result["value"][0];
        if status.is_null() {
            return Ok(None);
        }
        Ok(status["confirmationStatus"].as_str().map(|s| s.to_string()))
    }
}

/// Shared cache of the cluster's recent blockhash.
///
/// The mutex is held across the refresh RPC, so concurrent readers either
/// reuse the cached value or wait for the single in-flight refresh.
pub struct BlockhashCache {
    client: Arc<RpcClient>,
    refresh_interval: Duration,
    inner: Mutex<Option<(Hash, Instant)>>,
}

impl BlockhashCache {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self::new_with_interval(client, DEFAULT_BLOCKHASH_REFRESH)
    }

    pub fn new_with_interval(client: Arc<RpcClient>, refresh_interval: Duration) -> Self {
        Self {
            client,
            refresh_interval,
            inner: Mutex::new(None),
        }
    }

    pub fn recent_blockhash(&self) -> Result<Hash, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((blockhash, acquired_at)) = *inner {
            if acquired_at.elapsed() < self.refresh_interval {
                return Ok(blockhash);
            }
        }
        let blockhash = self.client.get_recent_blockhash()?;
        *inner = Some((blockhash, Instant::now()));
        Ok(blockhash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_build_request_json() {
        let json = RpcRequest::GetAccountInfo.build_request_json(42, json!(["key"]));
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 42);
        assert_eq!(json["method"], "getAccountInfo");
        assert_eq!(json["params"], json!(["key"]));
    }

    #[test]
    fn test_mock_sender_defaults() {
        let client = RpcClient::new_mock("succeeds".to_string());
        assert_eq!(
            client
                .get_account_data(&Pubkey::new_unique(), CommitmentLevel::Confirmed)
                .unwrap(),
            None
        );
        assert_eq!(
            client.get_balance(&Pubkey::new_unique()).unwrap(),
            1_000_000_000
        );
        assert_eq!(client.get_recent_blockhash().unwrap(), Hash::default());

        let client = RpcClient::new_mock("fails".to_string());
        let err = client.get_recent_blockhash().unwrap_err();
        assert!(matches!(err, ClientError::RpcError { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_mock_sender_account_data() {
        let sender = MockSender::new("succeeds".to_string());
        sender.add_mock(
            RpcRequest::GetAccountInfo,
            json!({
                "context": {"slot": 1},
                "value": {"data": [base64::encode(&[1u8, 2, 3]), "base64"], "lamports": 1},
            }),
        );
        let client = RpcClient::new_sender(sender);
        assert_eq!(
            client
                .get_account_data(&Pubkey::new_unique(), CommitmentLevel::Confirmed)
                .unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_retry_gives_up_on_reject() {
        let mut calls = 0;
        let result: Result<(), _> = retry(5, Duration::from_millis(0), || {
            calls += 1;
            Err(ClientError::RpcError {
                code: -32002,
                message: "Transaction simulation failed".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    struct CountingSender {
        refreshes: Arc<AtomicU64>,
    }

    impl RpcSender for CountingSender {
        fn send(&self, request: RpcRequest, _params: Value) -> Result<Value, ClientError> {
            assert_eq!(request, RpcRequest::GetRecentBlockhash);
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "context": {"slot": 1},
                "value": {"blockhash": crate::solana::hash::hash(b"fresh").to_string()},
            }))
        }
    }

    #[test]
    fn test_blockhash_cache_single_refresh() {
        let refreshes = Arc::new(AtomicU64::new(0));
        let client = Arc::new(RpcClient::new_sender(CountingSender {
            refreshes: refreshes.clone(),
        }));
        let cache = Arc::new(BlockhashCache::new_with_interval(
            client,
            Duration::from_secs(60),
        ));

        let mut handles = vec![];
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let blockhash = cache.recent_blockhash().unwrap();
                    assert_ne!(blockhash, Hash::default());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }
}
