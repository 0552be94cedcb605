//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// JSON 404 for unknown routes
async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(r#"{"error":"Not Found"}"#),
    )
        .into_response()
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/status", get(handlers::get_status))
        // Chain
        .route("/api/blocks", get(handlers::get_blocks))
        .route("/api/blocks/{index}", get(handlers::get_block_by_index))
        // Mining
        .route("/api/mine", post(handlers::mine_block))
        .route("/api/mine/transaction", post(handlers::mine_transaction))
        // Peers
        .route(
            "/api/peers",
            get(handlers::get_peers).post(handlers::add_peer),
        )
        // Wallet
        .route("/api/wallet", get(handlers::get_wallet))
        .route("/api/utxos", get(handlers::get_utxos))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}

