//! # Headless Simulation Client
//!
//! A remote client for the simulation server that needs no display. It
//! connects over TCP, optionally sends a `CREATE_ENVIRONMENT`, joins, and then
//! answers every `FRAME_UPDATE` with one `CLIENT_INPUT` chosen by an
//! [`shared::input::InputScript`]. Since the server only advances once every
//! avatar has answered, the client drives the simulation at the pace it reads
//! frames.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - TCP connection and length-framed message exchange
//! - Join and environment setup
//! - Scripted input per received frame
//! - Optional export of received images
//! - Run statistics (frames, inputs, images, positions)
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//! use shared::input::InputMode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         server_addr: "127.0.0.1:5556".to_string(),
//!         input: InputMode::Random,
//!         max_steps: Some(100),
//!         ..ClientConfig::default()
//!     };
//!
//!     let mut client = Client::new(config).await?;
//!     let stats = client.run().await?;
//!     println!("received {} frames", stats.frames_received);
//!
//!     Ok(())
//! }
//! ```

pub mod network;
