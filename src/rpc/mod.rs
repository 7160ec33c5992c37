//! JSON-RPC 2.0 over HTTP, backed by the same node facade the console uses.

pub mod handlers;
pub mod types;

use axum::{routing::post, Router};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::node::NodeFacade;
use crate::scheduler::cancelled;

#[derive(Clone)]
pub struct RpcState {
    pub node: Arc<dyn NodeFacade>,
}

pub struct RpcServer {
    state: RpcState,
    bind_addr: String,
}

impl RpcServer {
    pub fn new(node: Arc<dyn NodeFacade>, port: u16) -> Self {
        Self {
            state: RpcState { node },
            bind_addr: format!("0.0.0.0:{}", port),
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` flips to true.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;

        info!("🌐 RPC server listening on {}", self.bind_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancelled(&mut shutdown).await })
            .await
    }
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/", post(handlers::handle_rpc_request))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::types::RpcResponse;
    use super::*;
    use crate::address::Address;
    use crate::block::TransactionRequest;
    use crate::crypto::KeyPair;
    use crate::node::EmbeddedNode;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn call(app: Router, body: serde_json::Value) -> RpcResponse {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn rpc(method: &str, params: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 7 })
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let node = Arc::new(EmbeddedNode::new(Default::default()));
        let app = router(RpcState { node });
        let resp = call(app, rpc("mintMoney", serde_json::json!({}))).await;
        assert_eq!(resp.id, 7);
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_balance_and_block_count() {
        let rich = Address::from_bytes([0xaa; 20]);
        let node = Arc::new(EmbeddedNode::new([(rich, 42)].into_iter().collect()));
        let app = router(RpcState { node });

        let resp = call(app.clone(), rpc("getBalance", serde_json::json!({ "address": rich.to_hex() }))).await;
        assert_eq!(resp.result.unwrap()["balance"], 42);

        let resp = call(app.clone(), rpc("getBlockCount", serde_json::Value::Null)).await;
        assert_eq!(resp.result.unwrap()["block_count"], 1);

        let resp = call(app, rpc("getBalance", serde_json::json!({ "address": "zz" }))).await;
        assert_eq!(resp.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_unavailable_node_maps_to_server_error() {
        let node = Arc::new(EmbeddedNode::new(Default::default()));
        node.set_available(false);
        let app = router(RpcState { node });
        let resp = call(app, rpc("getNodeInfo", serde_json::Value::Null)).await;
        assert_eq!(resp.error.unwrap().code, -32000);
    }

    #[tokio::test]
    async fn test_submit_signed_transaction() {
        let kp = KeyPair::generate();
        let node = Arc::new(EmbeddedNode::new([(kp.address(), 100)].into_iter().collect()));
        let app = router(RpcState { node: node.clone() });
        let tx = TransactionRequest { from: kp.address(), to: Address::from_bytes([1; 20]), value: 5, nonce: 0 }.sign(&kp);
        let hash = tx.hash();

        let resp = call(app, rpc("submitTransaction", serde_json::json!({ "tx": tx }))).await;
        assert_eq!(resp.result.unwrap()["tx_hash"], hash);
        assert_eq!(node.mining_status().unwrap().pending, 1);
    }
}
