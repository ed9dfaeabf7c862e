//! # Game Client Library
//!
//! Headless predicting client. The local player is simulated immediately
//! from scripted input with the same calculators the server runs; every
//! predicted tick is snapshotted, and when the server acknowledges a tick
//! the prediction is checked slice by slice against the authoritative copy.
//! Divergent slices are refreshed and the unacknowledged ticks replayed.
//!
//! ## Module Organization
//!
//! - [`game`]: predicted player, authoritative copy, read-only mirrors and
//!   the reconciliation step
//! - [`input`]: seeded input generator and ground probe sampling
//! - [`network`]: UDP handshake and the `select!` loop pacing ticks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", 0, 42, Some(600)).await?;
//!     client.run().await
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
