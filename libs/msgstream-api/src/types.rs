use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::MqError;

/// Logical timestamp (hybrid clock value) carried by every message.
pub type Timestamp = u64;

/// Globally unique id allocated by the producing component.
pub type UniqueId = i64;

/// Message properties sent alongside the payload (type tag, etc).
pub type Properties = BTreeMap<String, String>;

/// Property key carrying the `MsgType` tag.
pub const MSG_TYPE_PROPERTY: &str = "msg_type";

// ════════════════════════════════════════════════════════════════
//  MsgType
// ════════════════════════════════════════════════════════════════

/// Type tag of a message. Travels in the `msg_type` property and selects
/// the unmarshal constructor on the consuming side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MsgType {
    Insert,
    Delete,
    Search,
    SearchResult,
    TimeTick,
    QueryNodeStats,
}

impl MsgType {
    pub const ALL: [MsgType; 6] = [
        MsgType::Insert,
        MsgType::Delete,
        MsgType::Search,
        MsgType::SearchResult,
        MsgType::TimeTick,
        MsgType::QueryNodeStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Insert => "Insert",
            MsgType::Delete => "Delete",
            MsgType::Search => "Search",
            MsgType::SearchResult => "SearchResult",
            MsgType::TimeTick => "TimeTick",
            MsgType::QueryNodeStats => "QueryNodeStats",
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MsgType {
    type Err = MqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MsgType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MqError::format_err(format!("unknown msg type '{s}'")))
    }
}

// ════════════════════════════════════════════════════════════════
//  MessageId
// ════════════════════════════════════════════════════════════════

/// Opaque backend cursor of a single delivered message.
///
/// The empty id is reserved: it denotes the point *before* the first
/// message of a channel, so seeking to it replays the whole channel.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Vec<u8>);

impl MessageId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn earliest() -> Self {
        Self(Vec::new())
    }

    pub fn is_earliest(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_earliest() {
            return f.write_str("MessageId(earliest)");
        }
        write!(f, "MessageId({})", base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.0);
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(MessageId(bytes))
    }
}

// ════════════════════════════════════════════════════════════════
//  Position
// ════════════════════════════════════════════════════════════════

/// Per-channel resume cursor. Seeking to a position resumes consumption
/// strictly after the message `msg_id` denotes.
///
/// Positions are plain values: the stream keeps no durable state, so the
/// caller persists the positions returned in each `MsgPack` to survive
/// restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub channel_name: String,
    pub msg_id: MessageId,
    /// Free-form group tag (the subscription the position was read under).
    #[serde(default)]
    pub msg_group: String,
    /// Synchronized tick at which the position was recorded.
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl Position {
    pub fn new(channel_name: impl Into<String>, msg_id: MessageId, msg_group: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            channel_name: channel_name.into(),
            msg_id,
            msg_group: msg_group.into(),
            timestamp,
        }
    }
}
