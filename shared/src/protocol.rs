//! Multi-part message model shared by server and client
//!
//! Every message is an ordered list of frames:
//! - frame 0: UTF-8 type tag (e.g. `CLIENT_INPUT`), used for cheap dispatch
//! - frame 1: UTF-8 JSON object carrying a `msg_type` field
//! - frames 2..: raw binary payloads (rendered images), order fixed per type
//!
//! The tag and `msg_type` are redundant; a mismatch is treated as a decode
//! failure so the receiver never acts on an ambiguous message.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Type tags understood on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientJoin,
    ClientInput,
    ClientSceneSwitch,
    CreateEnvironment,
    FrameUpdate,
    ClientInit,
    Unknown(String),
}

impl MessageType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "CLIENT_JOIN" => MessageType::ClientJoin,
            "CLIENT_INPUT" => MessageType::ClientInput,
            "CLIENT_SCENE_SWITCH" => MessageType::ClientSceneSwitch,
            "CREATE_ENVIRONMENT" => MessageType::CreateEnvironment,
            "FRAME_UPDATE" => MessageType::FrameUpdate,
            "CLIENT_INIT" => MessageType::ClientInit,
            other => MessageType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::ClientJoin => "CLIENT_JOIN",
            MessageType::ClientInput => "CLIENT_INPUT",
            MessageType::ClientSceneSwitch => "CLIENT_SCENE_SWITCH",
            MessageType::CreateEnvironment => "CREATE_ENVIRONMENT",
            MessageType::FrameUpdate => "FRAME_UPDATE",
            MessageType::ClientInit => "CLIENT_INIT",
            MessageType::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message has {0} frames, expected at least 2")]
    Truncated(usize),

    #[error("type tag frame is not valid UTF-8")]
    InvalidTag,

    #[error("cannot parse JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("JSON payload is not an object")]
    NotAnObject,

    #[error("JSON payload has no msg_type")]
    MissingType,

    #[error("type tag '{tag}' does not match msg_type '{msg_type}'")]
    TypeMismatch { tag: String, msg_type: String },

    #[error("wire message of {0} bytes exceeds the limit")]
    Oversized(usize),

    #[error("cannot decode wire body: {0}")]
    Wire(#[from] bincode::Error),
}

/// An ordered sequence of frames
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    frames: Vec<Vec<u8>>,
}

impl Message {
    pub fn from_frames(frames: Vec<Vec<u8>>) -> Self {
        Self { frames }
    }

    /// Builds `[tag][json][binary...]`, inserting `msg_type` into the payload object.
    pub fn build<T: Serialize>(
        msg_type: &MessageType,
        payload: &T,
        binary: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<Self, ProtocolError> {
        let mut object = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(ProtocolError::NotAnObject),
        };
        object.insert(
            "msg_type".to_string(),
            Value::String(msg_type.as_str().to_string()),
        );

        let json = serde_json::to_string(&Value::Object(object))?;
        let mut frames = vec![msg_type.as_str().as_bytes().to_vec(), json.into_bytes()];
        frames.extend(binary);
        Ok(Self { frames })
    }

    /// Message whose payload is only `{"msg_type": ...}`
    pub fn bare(msg_type: &MessageType) -> Self {
        let json = serde_json::json!({ "msg_type": msg_type.as_str() }).to_string();
        Self {
            frames: vec![msg_type.as_str().as_bytes().to_vec(), json.into_bytes()],
        }
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Vec<u8>> {
        self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Reads only the tag frame, without parsing JSON
    pub fn peek_type(&self) -> Option<MessageType> {
        let tag = self.frames.first()?;
        std::str::from_utf8(tag).ok().map(MessageType::from_tag)
    }

    /// Frames after the JSON payload
    pub fn binary_frames(&self) -> &[Vec<u8>] {
        self.frames.get(2..).unwrap_or(&[])
    }

    /// Validates the tag and JSON frames and returns the parsed envelope.
    pub fn decode(&self) -> Result<Envelope, ProtocolError> {
        if self.frames.len() < 2 {
            return Err(ProtocolError::Truncated(self.frames.len()));
        }
        let tag = std::str::from_utf8(&self.frames[0]).map_err(|_| ProtocolError::InvalidTag)?;

        let payload: Value = serde_json::from_slice(&self.frames[1])?;
        let object = match payload {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::NotAnObject),
        };
        let msg_type = match object.get("msg_type") {
            Some(Value::String(t)) => t.clone(),
            _ => return Err(ProtocolError::MissingType),
        };
        if msg_type != tag {
            return Err(ProtocolError::TypeMismatch {
                tag: tag.to_string(),
                msg_type,
            });
        }

        Ok(Envelope {
            msg_type: MessageType::from_tag(&msg_type),
            payload: object,
        })
    }

    /// Human-readable frame dump for debug logging
    pub fn describe(&self) -> String {
        let mut output = format!("({} frames)", self.frames.len());
        for (i, frame) in self.frames.iter().enumerate() {
            output.push_str(&format!("\n{}: \"{}\"", i, describe_frame(frame)));
        }
        output
    }
}

fn describe_frame(frame: &[u8]) -> String {
    match frame.len() {
        4 => i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]).to_string(),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(frame);
            i64::from_le_bytes(bytes).to_string()
        }
        n if n > 5000 => format!("BINARY {}", n),
        _ => String::from_utf8_lossy(frame).into_owned(),
    }
}

/// Decoded type and JSON object of a message
#[derive(Debug, Clone)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Deserializes the payload into a typed message body.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        new_scene: String,
    }

    #[test]
    fn test_build_inserts_msg_type_and_tag() {
        let msg = Message::build(
            &MessageType::ClientSceneSwitch,
            &Sample {
                new_scene: "Playroom".to_string(),
            },
            Vec::new(),
        )
        .unwrap();

        assert_eq!(msg.frame_count(), 2);
        assert_eq!(msg.frames()[0], b"CLIENT_SCENE_SWITCH");
        let envelope = msg.decode().unwrap();
        assert_eq!(envelope.msg_type, MessageType::ClientSceneSwitch);
        let sample: Sample = envelope.parse().unwrap();
        assert_eq!(sample.new_scene, "Playroom");
    }

    #[test]
    fn test_binary_frames_follow_json() {
        let msg = Message::build(
            &MessageType::FrameUpdate,
            &serde_json::json!({}),
            vec![vec![1, 2, 3], vec![4]],
        )
        .unwrap();

        assert_eq!(msg.frame_count(), 4);
        assert_eq!(msg.binary_frames(), &[vec![1, 2, 3], vec![4]]);
        assert!(Message::bare(&MessageType::ClientJoin).binary_frames().is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let msg = Message::from_frames(vec![b"CLIENT_JOIN".to_vec(), b"{not json".to_vec()]);
        assert!(matches!(msg.decode(), Err(ProtocolError::MalformedJson(_))));
    }

    #[test]
    fn test_decode_rejects_missing_msg_type() {
        let msg = Message::from_frames(vec![b"CLIENT_JOIN".to_vec(), b"{\"a\":1}".to_vec()]);
        assert!(matches!(msg.decode(), Err(ProtocolError::MissingType)));
    }

    #[test]
    fn test_decode_rejects_truncated_message() {
        let msg = Message::from_frames(vec![b"CLIENT_JOIN".to_vec()]);
        assert!(matches!(msg.decode(), Err(ProtocolError::Truncated(1))));
        assert!(matches!(
            Message::default().decode(),
            Err(ProtocolError::Truncated(0))
        ));
    }

    #[test]
    fn test_decode_rejects_tag_mismatch() {
        let msg = Message::from_frames(vec![
            b"CLIENT_INPUT".to_vec(),
            b"{\"msg_type\":\"CLIENT_JOIN\"}".to_vec(),
        ]);
        assert!(matches!(
            msg.decode(),
            Err(ProtocolError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let msg = Message::bare(&MessageType::Unknown("CLIENT_DANCE".to_string()));
        let envelope = msg.decode().unwrap();
        assert_eq!(
            envelope.msg_type,
            MessageType::Unknown("CLIENT_DANCE".to_string())
        );
        assert_eq!(msg.peek_type().unwrap().as_str(), "CLIENT_DANCE");
    }

    #[test]
    fn test_tag_round_trip_for_known_types() {
        for tag in [
            "CLIENT_JOIN",
            "CLIENT_INPUT",
            "CLIENT_SCENE_SWITCH",
            "CREATE_ENVIRONMENT",
            "FRAME_UPDATE",
            "CLIENT_INIT",
        ] {
            let msg_type = MessageType::from_tag(tag);
            assert!(!matches!(msg_type, MessageType::Unknown(_)));
            assert_eq!(msg_type.as_str(), tag);
        }
    }

    #[test]
    fn test_describe_formats_frames() {
        let msg = Message::from_frames(vec![
            b"CLIENT_INPUT".to_vec(),
            42i32.to_le_bytes().to_vec(),
            vec![0u8; 6000],
        ]);
        let text = msg.describe();
        assert!(text.starts_with("(3 frames)"));
        assert!(text.contains("0: \"CLIENT_INPUT\""));
        assert!(text.contains("1: \"42\""));
        assert!(text.contains("BINARY 6000"));
    }
}
