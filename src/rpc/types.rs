// RPC types for JSON-RPC 2.0 protocol
use serde::{Deserialize, Serialize};

use crate::block::SignedTransaction;

#[derive(Deserialize, Debug)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;
    /// Node not ready; retry later
    pub const UNAVAILABLE: i32 = -32000;
    pub const REJECTED: i32 = -32001;

    pub fn invalid_params(e: impl std::fmt::Display) -> Self {
        RpcError { code: Self::INVALID_PARAMS, message: format!("Invalid params: {}", e) }
    }
}

// Method-specific parameter types
#[derive(Deserialize, Debug)]
pub struct GetBalanceParams {
    pub address: String,
}

#[derive(Deserialize, Debug)]
pub struct SubmitTransactionParams {
    pub tx: SignedTransaction,
}

#[derive(Serialize, Debug)]
pub struct NodeInfo {
    pub block_count: u64,
    pub peer_count: usize,
    pub mining: bool,
    pub networking: bool,
    pub version: String,
}
