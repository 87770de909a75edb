//! # Simulation Server Library
//!
//! This library provides the server side of the avatar simulation. Remote
//! clients steer avatars inside a physics world and receive, for every
//! simulation step, rendered camera images plus structured world state:
//! which objects their avatar can see and which relationships hold between
//! them.
//!
//! ## Core Responsibilities
//!
//! ### Lock-Step Simulation
//! The world only advances once every joined avatar has submitted input for
//! the current step. A slow client therefore stalls everyone, which keeps all
//! clients observing the same step. A disconnect re-evaluates the barrier so
//! the remaining avatars are never stuck on a departed one.
//!
//! ### Session Management
//! Handles the complete lifecycle of client connections:
//! - Connection establishment and join handling
//! - Replacement of the avatar when a connection joins again
//! - Input decoding and application
//! - Disconnection handling and resource release
//!
//! ### Frame Delivery
//! After each step the server queues one capture per avatar. Captures are
//! drained strictly after the renderer finishes a frame, in the order they
//! were queued, and each completion is turned into a `FRAME_UPDATE` carrying
//! one image per render variant.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Tick Loop
//! All simulation state lives in one [`session_manager::SessionManager`]
//! that is mutated only from the tick loop. Network tasks never touch it;
//! they move whole messages over channels that the manager polls once per
//! tick.
//!
//! ### Collaborators Behind Traits
//! Physics ([`physics::PhysicsWorld`]), rendering ([`capture::Renderer`]),
//! scene loading ([`scene::SceneLoader`]) and relationships
//! ([`relations::Relationship`]) are trait objects. The built-in
//! implementations are small enough to run headless in tests.
//!
//! ## Module Organization
//!
//! - `avatar`: per-connection agent state and input application
//! - `capture`: capture requests, the FIFO pipeline and the renderer seam
//! - `config`: startup configuration and runtime environment overrides
//! - `connection`: TCP and loopback transports with non-blocking polling
//! - `network`: TCP listener and the tick loop
//! - `physics`: physics collaborator trait and a sphere-body implementation
//! - `relations`: relationship trait, built-in relationships and filtering
//! - `scene`: scene collaborator trait and the built-in catalog
//! - `semantic`: named objects, composites and observation
//! - `session_manager`: dispatch, barrier and frame assembly
//! - `session_registry`: the single table of connections and avatars
//! - `spawn`: random collision-free spawn placement
//! - `test_client`: in-process client for protocol self-tests
//! - `world`: physics plus semantic registry
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         environment_scene: "Playroom".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!
//!     // Accepts clients, advances the simulation whenever every avatar
//!     // is ready, and streams frames back until shut down
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod avatar;
pub mod capture;
pub mod config;
pub mod connection;
pub mod network;
pub mod physics;
pub mod relations;
pub mod scene;
pub mod semantic;
pub mod session_manager;
pub mod session_registry;
pub mod spawn;
pub mod test_client;
pub mod world;
