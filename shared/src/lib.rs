//! # Shared Protocol Library
//!
//! Types and codecs used by both the simulation server and remote clients.
//!
//! ## Wire Format
//! A message is an ordered list of frames `[type tag][JSON][binary...]`
//! (see [`protocol`]). On a byte stream each message travels as a
//! big-endian `u32` length followed by the bincode-encoded frame list
//! (see [`wire`]).
//!
//! ## Control Input
//! Target velocity and rotation are sent as fixed-point integers
//! (`round(value * 2^30)`), three per vector (see [`quantize`]).
//!
//! ## Module Organization
//! - `math`: `Vec3` / `Quat` used for transforms and input
//! - `protocol`: message types, frames, envelope decoding, errors
//! - `messages`: typed JSON payloads per message type
//! - `quantize`: fixed-point scalar/vector encoding
//! - `wire`: length-framed stream encoding
//! - `input`: scripted controller input for headless clients
//! - `images`: debug export of received image frames

pub mod images;
pub mod input;
pub mod math;
pub mod messages;
pub mod protocol;
pub mod quantize;
pub mod wire;

pub use math::{Quat, Vec3};
pub use messages::{
    DecodedInput, EnvironmentConfig, FrameUpdate, InputCommand, JoinRequest, SceneSwitch,
    ALL_RELATIONSHIPS, DEFAULT_SCENE,
};
pub use protocol::{Envelope, Message, MessageType, ProtocolError};
