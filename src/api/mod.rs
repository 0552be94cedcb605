//! REST API module
//!
//! Thin HTTP control surface over a running node. Every mutation goes
//! through the node's chain synchronizer.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/status` - Height, tip, difficulty, work and peer count
//! - `GET /api/blocks` - The whole chain
//! - `GET /api/blocks/{index}` - One block
//! - `POST /api/mine` - Mine `{data: Transaction[]}` into a block
//! - `POST /api/mine/transaction` - Pay `{address, amount}` from the node wallet
//! - `GET /api/peers` / `POST /api/peers` - List or dial peers (`{peer}`)
//! - `GET /api/wallet` - Node wallet address and balance
//! - `GET /api/utxos` - All unspent outputs

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
