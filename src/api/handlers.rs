//! REST API handlers for node operations

use crate::core::{Block, Transaction, UnspentTxOut};
use crate::mining::MiningError;
use crate::network::{Node, NodeError, NodeStatus, PeerError, PeerInfo};
use crate::wallet::WalletInfo;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MineRequest {
    #[serde(default)]
    pub data: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddPeerRequest {
    pub peer: String,
}

#[derive(Debug, Serialize)]
pub struct PeerAdded {
    pub peer: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn error_response(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
        }),
    )
}

impl From<NodeError> for (StatusCode, Json<ApiError>) {
    fn from(err: NodeError) -> Self {
        let status = match &err {
            NodeError::Mining(MiningError::Preempted) => StatusCode::CONFLICT,
            NodeError::Mining(MiningError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            NodeError::Wallet(_) => StatusCode::BAD_REQUEST,
            NodeError::Peer(PeerError::AlreadyConnected(_)) => StatusCode::CONFLICT,
            NodeError::Peer(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log::warn!("API request failed: {}", err);
        error_response(status, err)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn get_status(State(state): State<ApiState>) -> Json<NodeStatus> {
    Json(state.node.status().await)
}

/// The whole chain, genesis first
pub async fn get_blocks(State(state): State<ApiState>) -> Json<Vec<Block>> {
    let blocks = state.node.chain_sync.snapshot().await.blocks();
    Json(blocks.to_vec())
}

pub async fn get_block_by_index(
    State(state): State<ApiState>,
    Path(index): Path<u64>,
) -> ApiResult<Block> {
    let chain = state.node.chain_sync.snapshot().await;
    chain
        .get_block(index)
        .cloned()
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("Block {} not found", index)))
}

/// Mine the given transactions into a new block
pub async fn mine_block(
    State(state): State<ApiState>,
    Json(req): Json<MineRequest>,
) -> ApiResult<Block> {
    let block = state.node.mine_block(req.data).await?;
    Ok(Json(block))
}

/// Pay from the node wallet and mine the payment
pub async fn mine_transaction(
    State(state): State<ApiState>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<Block> {
    let block = state.node.mine_transaction(&req.address, req.amount).await?;
    Ok(Json(block))
}

/// Connected peers with direction and connection time
pub async fn get_peers(State(state): State<ApiState>) -> Json<Vec<PeerInfo>> {
    Json(state.node.peer_manager.get_peers().await)
}

pub async fn add_peer(
    State(state): State<ApiState>,
    Json(req): Json<AddPeerRequest>,
) -> ApiResult<PeerAdded> {
    let addr = state.node.connect_to(&req.peer).await?;
    Ok(Json(PeerAdded {
        peer: addr.to_string(),
    }))
}

pub async fn get_wallet(State(state): State<ApiState>) -> Json<WalletInfo> {
    let utxos = state.node.chain_sync.snapshot().await.utxos();
    Json(state.node.wallet.info(&utxos))
}

/// Every unspent output, ordered by outpoint
pub async fn get_utxos(State(state): State<ApiState>) -> Json<Vec<UnspentTxOut>> {
    let utxos = state.node.chain_sync.snapshot().await.utxos();
    Json(utxos.to_sorted_vec())
}
