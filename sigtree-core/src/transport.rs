//! Transport collaborator seam
//!
//! The engine never speaks HTTP itself; it consumes a small `get(endpoint,
//! args)` client and parses each response into a typed wire struct with a
//! single fallible `serde_json` pass. Fetches carry an explicit timeout, and
//! a timed-out or cancelled fetch surfaces as a distinguished incomplete
//! error rather than an empty result.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigtree_model::{Seqno, Uid};
use thiserror::Error;

/// Endpoint serving `{root, path, uid, id_version}`.
pub const MERKLE_PATH: &str = "merkle/path";

/// Endpoint serving chain links in ascending seqno order from `low`.
pub const SIG_GET: &str = "sig/get";

/// Errors from the transport layer. Distinguished from every verification
/// failure so callers may retry these and only these.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no response for endpoint {0}")]
    NoResponse(String),
}

/// Request arguments for one fetch.
#[derive(Clone, Debug, Default)]
pub struct ApiArgs {
    pub uid: Option<Uid>,
    pub low: Option<Seqno>,
    pub timeout: Option<Duration>,
}

impl ApiArgs {
    pub fn for_uid(uid: Uid) -> Self {
        Self {
            uid: Some(uid),
            ..Default::default()
        }
    }

    pub fn low(mut self, low: Seqno) -> Self {
        self.low = Some(low);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The HTTP client abstraction this engine consumes.
pub trait ApiClient: Send + Sync {
    fn get(&self, endpoint: &str, args: &ApiArgs) -> Result<Value, FetchError>;
}

// --- Typed wire messages ---

/// `merkle/path` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MerklePathResponse {
    pub root: WireRoot,
    pub path: Vec<WirePathStep>,
    pub uid: Uid,
    pub id_version: u64,
}

/// The signed root statement as served: the signature envelope and the exact
/// payload string it covers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireRoot {
    pub sig: String,
    pub payload_json: String,
}

/// One root-to-leaf proof step: the hex path position of the node to descend
/// into, plus the raw JSON of the current node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WirePathStep {
    pub prefix: String,
    pub node: String,
}

/// `sig/get` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigGetResponse {
    pub sigs: Vec<WireSig>,
}

/// One served chain link.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireSig {
    pub payload_hash: String,
    pub sig: String,
    pub sig_id: String,
    pub payload_json: String,
}

/// Fetch and parse the Merkle path for a user.
pub fn fetch_merkle_path(
    api: &dyn ApiClient,
    uid: Uid,
    timeout: Duration,
) -> Result<MerklePathResponse, FetchError> {
    let args = ApiArgs::for_uid(uid).timeout(timeout);
    let value = api.get(MERKLE_PATH, &args)?;
    Ok(serde_json::from_value(value)?)
}

/// Fetch and parse chain links with seqno > `low`.
pub fn fetch_sig_chain(
    api: &dyn ApiClient,
    uid: Uid,
    low: Seqno,
    timeout: Duration,
) -> Result<SigGetResponse, FetchError> {
    let args = ApiArgs::for_uid(uid).low(low).timeout(timeout);
    let value = api.get(SIG_GET, &args)?;
    Ok(serde_json::from_value(value)?)
}

// --- Test double ---

/// In-memory server double holding canned responses per endpoint.
#[derive(Default)]
pub struct MockApi {
    responses: Mutex<HashMap<String, Value>>,
    fail_with_timeout: Mutex<bool>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the canned response for an endpoint.
    pub fn respond(&self, endpoint: &str, value: Value) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(endpoint.to_string(), value);
        }
    }

    /// Make every subsequent fetch time out.
    pub fn start_timing_out(&self) {
        if let Ok(mut flag) = self.fail_with_timeout.lock() {
            *flag = true;
        }
    }
}

impl ApiClient for MockApi {
    fn get(&self, endpoint: &str, args: &ApiArgs) -> Result<Value, FetchError> {
        if self.fail_with_timeout.lock().map(|f| *f).unwrap_or(false) {
            return Err(FetchError::TimedOut(
                args.timeout.unwrap_or(Duration::from_secs(0)),
            ));
        }
        self.responses
            .lock()
            .ok()
            .and_then(|responses| responses.get(endpoint).cloned())
            .ok_or_else(|| FetchError::NoResponse(endpoint.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mock_round_trip() {
        let api = MockApi::new();
        api.respond(SIG_GET, json!({ "sigs": [] }));

        let resp = fetch_sig_chain(&api, Uid([1; 16]), Seqno(0), Duration::from_secs(5)).unwrap();
        assert!(resp.sigs.is_empty());
    }

    #[test]
    fn test_timeout_is_distinguished() {
        let api = MockApi::new();
        api.respond(SIG_GET, json!({ "sigs": [] }));
        api.start_timing_out();

        let err = fetch_sig_chain(&api, Uid([1; 16]), Seqno(0), Duration::from_secs(5))
            .expect_err("should time out");
        assert!(matches!(err, FetchError::TimedOut(_)));
    }

    #[test]
    fn test_malformed_response_is_a_fetch_error() {
        let api = MockApi::new();
        api.respond(SIG_GET, json!({ "unexpected": true }));

        let err = fetch_sig_chain(&api, Uid([1; 16]), Seqno(0), Duration::from_secs(5))
            .expect_err("should fail to parse");
        assert!(matches!(err, FetchError::Malformed(_)));
    }
}
