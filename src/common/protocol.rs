//! Wire protocol spoken over the group-chat WebSocket.
//!
//! Every frame is a JSON text message with a `type` tag and camelCase fields.
//! Each frame belongs to exactly one group (`groupId`) and one user (`userId`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::common::models::{FileMeta, GroupId, UserId};

/// Tags this client understands. Anything else is reported as
/// [`Inbound::Unrecognized`].
pub const KNOWN_FRAME_TYPES: [&str; 7] = [
    "join",
    "leave",
    "message",
    "member_joined",
    "member_left",
    "typing",
    "file_uploaded",
];

/// Payload shared by join/leave/presence/typing frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub group_id: GroupId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub content: String,
    /// Milliseconds since the Unix epoch, set by the sender.
    pub timestamp: i64,
    /// Server-assigned message id, absent on outbound frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Correlation id of the sending client, echoed back by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFrame {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub file: FileMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Join(Presence),
    Leave(Presence),
    Message(ChatFrame),
    MemberJoined(Presence),
    MemberLeft(Presence),
    Typing(Presence),
    FileUploaded(FileFrame),
}

impl Frame {
    pub fn join(group_id: impl Into<GroupId>, user_id: impl Into<UserId>) -> Self {
        Frame::Join(Presence {
            group_id: group_id.into(),
            user_id: user_id.into(),
            user_name: None,
        })
    }

    pub fn leave(group_id: impl Into<GroupId>, user_id: impl Into<UserId>) -> Self {
        Frame::Leave(Presence {
            group_id: group_id.into(),
            user_id: user_id.into(),
            user_name: None,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Join(_) => "join",
            Frame::Leave(_) => "leave",
            Frame::Message(_) => "message",
            Frame::MemberJoined(_) => "member_joined",
            Frame::MemberLeft(_) => "member_left",
            Frame::Typing(_) => "typing",
            Frame::FileUploaded(_) => "file_uploaded",
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Frame::Join(p)
            | Frame::Leave(p)
            | Frame::MemberJoined(p)
            | Frame::MemberLeft(p)
            | Frame::Typing(p) => &p.group_id,
            Frame::Message(m) => &m.group_id,
            Frame::FileUploaded(f) => &f.group_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Frame::Join(p)
            | Frame::Leave(p)
            | Frame::MemberJoined(p)
            | Frame::MemberLeft(p)
            | Frame::Typing(p) => &p.user_id,
            Frame::Message(m) => &m.user_id,
            Frame::FileUploaded(f) => &f.user_id,
        }
    }
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    /// Well-formed JSON carrying a `type` this client does not handle.
    Unrecognized { kind: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("missing or non-string `type` field")]
    MissingType,
    #[error("malformed `{kind}` frame: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{kind}` frame: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes a text frame. Reads the tag first so that unknown types are
/// distinguishable from malformed known ones.
pub fn parse_frame(text: &str) -> Result<Inbound, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();

    if !KNOWN_FRAME_TYPES.contains(&kind.as_str()) {
        return Ok(Inbound::Unrecognized { kind });
    }

    serde_json::from_value::<Frame>(value)
        .map(Inbound::Frame)
        .map_err(|source| FrameError::InvalidPayload { kind, source })
}

pub fn encode_frame(frame: &Frame) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(|source| FrameError::Encode {
        kind: frame.kind(),
        source,
    })
}
