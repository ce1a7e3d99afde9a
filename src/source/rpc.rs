//! EVM JSON-RPC event source.
//!
//! Each poll asks the node for its tip, then for the logs of the watched
//! contract/topic in the next unscanned block window. The cursor moves to
//! the end of that window only after both calls succeeded. A single log
//! that cannot be decoded is malformed: it is logged and skipped, and the
//! rest of the window is still delivered.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{EventSource, StartMode};
use crate::error::{BridgeError, BridgeResult};
use crate::event::{Cursor, Event, EventSchema, Position};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC 2.0 client over HTTP POST.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| BridgeError::config(format!("http client: {e}")))?;

        Ok(Self { client, url: url.into(), request_id: AtomicU64::new(1) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Call `method`. Every failure here is transient from the caller's view.
    pub async fn call<P, R>(&self, method: &str, params: P) -> BridgeResult<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest { jsonrpc: "2.0", method, params, id: self.next_id() };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BridgeError::transient(format!("{method}: cannot connect to {}", self.url))
                } else if e.is_timeout() {
                    BridgeError::transient(format!("{method}: request timed out"))
                } else {
                    BridgeError::transient(format!("{method}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::transient(format!("{method}: HTTP {status}")));
        }

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| BridgeError::transient(format!("{method}: bad response: {e}")))?;

        if let Some(err) = body.error {
            return Err(BridgeError::transient(format!(
                "{method}: rpc error {}: {}",
                err.code, err.message
            )));
        }

        body.result
            .ok_or_else(|| BridgeError::transient(format!("{method}: missing result")))
    }

    pub async fn block_number(&self) -> BridgeResult<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw).map_err(|e| BridgeError::transient(format!("eth_blockNumber: {e}")))
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> BridgeResult<Vec<RpcLog>> {
        self.call("eth_getLogs", json!([filter])).await
    }
}

/// `eth_getLogs` filter object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub from_block: String,
    pub to_block: String,
    pub address: String,
    pub topics: Vec<String>,
}

impl LogFilter {
    pub fn new(from: u64, to: u64, address: &str, topic: &str) -> Self {
        Self {
            from_block: format!("{from:#x}"),
            to_block: format!("{to:#x}"),
            address: address.to_string(),
            topics: vec![topic.to_string()],
        }
    }
}

/// Log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub block_number: Option<String>,
    pub log_index: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RpcLog {
    /// `Ok(None)` for pending logs that carry no position yet.
    pub fn into_event(self) -> Result<Option<Event>, String> {
        let (Some(block), Some(index)) = (self.block_number.as_deref(), self.log_index.as_deref()) else {
            return Ok(None);
        };
        let position = Position::new(parse_quantity(block)?, parse_quantity(index)?);

        let topics = self
            .topics
            .iter()
            .map(|t| parse_word(t))
            .collect::<Result<Vec<_>, _>>()?;
        let data = parse_bytes(&self.data)?;

        let mut event = Event::new(position)
            .with_contract(self.address.to_ascii_lowercase())
            .with_topics(topics)
            .with_data(data);
        if let Some(hash) = self.transaction_hash {
            event = event.with_tx_hash(hash);
        }
        Ok(Some(event))
    }
}

fn strip_hex(value: &str) -> &str {
    value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")).unwrap_or(value)
}

pub fn parse_quantity(value: &str) -> Result<u64, String> {
    let digits = strip_hex(value);
    if digits.is_empty() {
        return Err(format!("empty quantity '{value}'"));
    }
    u64::from_str_radix(digits, 16).map_err(|_| format!("invalid quantity '{value}'"))
}

fn parse_bytes(value: &str) -> Result<Vec<u8>, String> {
    hex::decode(strip_hex(value)).map_err(|_| format!("invalid hex data '{value}'"))
}

fn parse_word(value: &str) -> Result<[u8; 32], String> {
    let bytes = parse_bytes(value)?;
    bytes.try_into().map_err(|_| format!("topic '{value}' is not 32 bytes"))
}

/// Connection settings for [`JsonRpcSource`].
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub endpoint: String,
    pub contract: String,
    pub start: StartMode,
    /// Blocks behind the tip considered final enough to act on.
    pub confirmations: u64,
    /// Upper bound on blocks per `eth_getLogs` request.
    pub max_block_range: u64,
    pub request_timeout: Duration,
}

impl SourceOptions {
    pub fn new(endpoint: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            contract: contract.into(),
            start: StartMode::Latest,
            confirmations: 0,
            max_block_range: 2000,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_start(mut self, start: StartMode) -> Self { self.start = start; self }
    pub fn with_confirmations(mut self, n: u64) -> Self { self.confirmations = n; self }
    pub fn with_max_block_range(mut self, n: u64) -> Self { self.max_block_range = n; self }
    pub fn with_request_timeout(mut self, t: Duration) -> Self { self.request_timeout = t; self }
}

pub struct JsonRpcSource {
    client: RpcClient,
    contract: String,
    topic: String,
    cursor: Cursor,
    confirmations: u64,
    max_block_range: u64,
}

impl JsonRpcSource {
    /// Resolve the tip and place the cursor. Failing to reach the node at
    /// all is fatal: there is nothing to retry against yet.
    pub async fn connect(options: SourceOptions, schema: &EventSchema) -> BridgeResult<Self> {
        let client = RpcClient::new(&options.endpoint, options.request_timeout)?;
        let tip = client.block_number().await.map_err(|e| {
            BridgeError::SourceUnavailable(format!("{}: {}", options.endpoint, e))
        })?;

        let safe_tip = tip.saturating_sub(options.confirmations);
        let cursor = options.start.initial_cursor(safe_tip);

        info!(
            endpoint = %options.endpoint,
            contract = %options.contract,
            event = %schema.signature(),
            tip,
            cursor = %cursor,
            start = %options.start,
            "Connected to event source"
        );

        Ok(Self {
            client,
            contract: options.contract,
            topic: schema.topic_hex(),
            cursor,
            confirmations: options.confirmations,
            max_block_range: options.max_block_range.max(1),
        })
    }
}

#[async_trait]
impl EventSource for JsonRpcSource {
    async fn poll(&mut self) -> BridgeResult<Vec<Event>> {
        let tip = self.client.block_number().await?.saturating_sub(self.confirmations);
        let from = self.cursor.next_block();
        if from > tip {
            return Ok(Vec::new());
        }
        let to = tip.min(from.saturating_add(self.max_block_range - 1));

        let filter = LogFilter::new(from, to, &self.contract, &self.topic);
        let logs = self.client.get_logs(&filter).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                continue;
            }
            let block = log.block_number.clone();
            let tx = log.transaction_hash.clone();
            let event = match log.into_event() {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        block = block.as_deref().unwrap_or("-"),
                        tx = tx.as_deref().unwrap_or("-"),
                        error = %e,
                        kind = "malformed_event",
                        "Skipping undecodable log"
                    );
                    continue;
                }
            };
            if event.position.block < from || event.position.block > to || !self.cursor.admits(&event.position) {
                continue;
            }
            events.push(event);
        }
        events.sort_by_key(|e| e.position);
        events.dedup_by_key(|e| e.position);

        self.cursor.advance_to(Position::block_end(to));
        debug!(from, to, count = events.len(), cursor = %self.cursor, "Scanned block window");
        Ok(events)
    }

    fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn describe(&self) -> String {
        format!("json-rpc {}", self.client.url())
    }
}
