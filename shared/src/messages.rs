//! Typed JSON payloads for each message type
//!
//! `msg_type` is added and checked by [`crate::protocol`]; these structs only
//! describe the remaining fields. Unknown fields are ignored on receipt.

use crate::math::{Quat, Vec3};
use crate::protocol::{Message, MessageType, ProtocolError};
use crate::quantize::{encode_vector, QuantizedReader};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wildcard relationship subscription
pub const ALL_RELATIONSHIPS: &str = "ALL";

/// Scene loaded when a switch names none
pub const DEFAULT_SCENE: &str = "Empty";

/// `CLIENT_JOIN`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Whether observed objects and relations are reported (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_obj_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<String>,
    /// Render variants; `null` entries mean default rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shaders: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub send_scene_info: bool,
}

impl JoinRequest {
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        Message::build(&MessageType::ClientJoin, self, Vec::new())
    }
}

/// `CLIENT_INPUT`: quantized target velocity and rotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    #[serde(default)]
    pub vel: Vec<i32>,
    #[serde(default)]
    pub ang_vel: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_obj_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<String>>,
}

/// Input after fixed-point decoding
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecodedInput {
    pub velocity: Vec3,
    pub rotation: Vec3,
}

impl InputCommand {
    pub fn from_vectors(velocity: Vec3, rotation: Vec3) -> Self {
        Self {
            vel: encode_vector(velocity).to_vec(),
            ang_vel: encode_vector(rotation).to_vec(),
            ..Self::default()
        }
    }

    /// Missing trailing components decode as 0.0
    pub fn decode(&self) -> DecodedInput {
        DecodedInput {
            velocity: QuantizedReader::new(&self.vel).read_vector(),
            rotation: QuantizedReader::new(&self.ang_vel).read_vector(),
        }
    }

    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        Message::build(&MessageType::ClientInput, self, Vec::new())
    }
}

/// Runtime-adjustable environment settings (`CREATE_ENVIRONMENT`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_scene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_range: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot_speed: Option<f32>,
}

impl EnvironmentConfig {
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        Message::build(&MessageType::CreateEnvironment, self, Vec::new())
    }
}

/// `CLIENT_SCENE_SWITCH`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSwitch {
    #[serde(default = "default_scene")]
    pub new_scene: String,
    #[serde(flatten)]
    pub config: EnvironmentConfig,
}

fn default_scene() -> String {
    DEFAULT_SCENE.to_string()
}

impl SceneSwitch {
    pub fn new(new_scene: &str) -> Self {
        Self {
            new_scene: new_scene.to_string(),
            config: EnvironmentConfig::default(),
        }
    }

    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        Message::build(&MessageType::ClientSceneSwitch, self, Vec::new())
    }
}

/// `FRAME_UPDATE` JSON part; images travel as binary frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_objects: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_relations: Option<Map<String, Value>>,
    pub avatar_position: Vec3,
    pub avatar_rotation: Quat,
    /// `[identifier, numeric id]` per registered object
    #[serde(
        rename = "sceneInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scene_info: Option<Vec<[String; 2]>>,
}

impl FrameUpdate {
    pub fn to_message(&self, images: Vec<Vec<u8>>) -> Result<Message, ProtocolError> {
        Message::build(&MessageType::FrameUpdate, self, images)
    }
}
