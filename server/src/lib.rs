//! # Game Server Library
//!
//! Authoritative side of the prediction/reconciliation engine. The server
//! owns the canonical state of every player, applies client commands only on
//! the tick boundary and broadcasts per-slice deltas together with the last
//! tick it acknowledged for each client.
//!
//! ## Module Organization
//!
//! - [`client_manager`]: connection roster, capacity limit and timeouts
//! - [`game`]: command inbox, tick stepping, delta and keyframe generation
//! - [`network`]: UDP receiver/sender/timeout tasks and the `select!` loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::config::GameConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(GameConfig::default().with_tick_rate(30));
//!     let mut server = Server::new("127.0.0.1:8080", config, 16).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! A client's command takes effect on the first tick after it arrives:
//! immediate requests (shop, inventory) before the tick's simulation, and
//! predicted commands grouped by the tick they were produced for.

pub mod client_manager;
pub mod game;
pub mod network;
