use super::types::*;
use crate::address::Address;
use crate::node::NodeError;
use crate::rpc::RpcState;
use axum::{debug_handler, extract::State, Json};
use tracing::{debug, info};

/// Main dispatcher: routes incoming JSON-RPC requests to the correct handler.
#[debug_handler]
pub async fn handle_rpc_request(
    State(state): State<RpcState>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    debug!("RPC Request: method={}, id={}", req.method, req.id);

    let result = match req.method.as_str() {
        "getBlockCount" => handle_get_block_count(&state),
        "getPeerCount" => handle_get_peer_count(&state),
        "getMining" => handle_get_mining(&state),
        "getBalance" => handle_get_balance(&state, req.params),
        "getNodeInfo" => handle_get_node_info(&state),
        "submitTransaction" => handle_submit_transaction(&state, req.params),
        "getVersion" => handle_get_version(),
        _ => Err(RpcError {
            code: RpcError::METHOD_NOT_FOUND,
            message: format!("Method not found: {}", req.method),
        }),
    };

    match result {
        Ok(val) => Json(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(val),
            error: None,
            id: req.id,
        }),
        Err(err) => Json(RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(err),
            id: req.id,
        }),
    }
}

//
// === Helper Functions ===
//
fn node_error(e: NodeError) -> RpcError {
    let code = match e {
        NodeError::Unavailable(_) => RpcError::UNAVAILABLE,
        NodeError::Rejected(_) | NodeError::InvalidBlock(_) => RpcError::REJECTED,
    };
    RpcError { code, message: e.to_string() }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError {
        code: RpcError::INTERNAL,
        message: format!("Serialization error: {}", e),
    })
}

//
// === Individual Handlers ===
//

fn handle_get_block_count(state: &RpcState) -> Result<serde_json::Value, RpcError> {
    let count = state.node.current_block_count().map_err(node_error)?;
    Ok(serde_json::json!({ "block_count": count }))
}

fn handle_get_peer_count(state: &RpcState) -> Result<serde_json::Value, RpcError> {
    let peers = state.node.peer_count().map_err(node_error)?;
    Ok(serde_json::json!({ "peer_count": peers }))
}

fn handle_get_mining(state: &RpcState) -> Result<serde_json::Value, RpcError> {
    let status = state.node.mining_status().map_err(node_error)?;
    to_json(&status)
}

/// Handle getBalance(address)
fn handle_get_balance(state: &RpcState, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: GetBalanceParams = serde_json::from_value(params).map_err(RpcError::invalid_params)?;
    let address: Address = p.address.parse().map_err(RpcError::invalid_params)?;
    let balance = state.node.balance_of(&address).map_err(node_error)?;
    Ok(serde_json::json!({ "address": address, "balance": balance }))
}

fn handle_get_node_info(state: &RpcState) -> Result<serde_json::Value, RpcError> {
    let node = &state.node;
    to_json(&NodeInfo {
        block_count: node.current_block_count().map_err(node_error)?,
        peer_count: node.peer_count().map_err(node_error)?,
        mining: node.is_mining().map_err(node_error)?,
        networking: node.is_networking().map_err(node_error)?,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle submitTransaction(tx). Only pre-signed transactions are accepted.
fn handle_submit_transaction(state: &RpcState, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let p: SubmitTransactionParams = serde_json::from_value(params).map_err(RpcError::invalid_params)?;
    let hash = state.node.submit_transaction(p.tx).map_err(node_error)?;
    info!("RPC: accepted transaction {}", hash);
    Ok(serde_json::json!({
        "status": "Submitted",
        "tx_hash": hash
    }))
}

fn handle_get_version() -> Result<serde_json::Value, RpcError> {
    Ok(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}
