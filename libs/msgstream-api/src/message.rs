use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{MqError, MsgType, Position, Timestamp, UniqueId};

// ════════════════════════════════════════════════════════════════
//  Payloads
// ════════════════════════════════════════════════════════════════

/// Header shared by every request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgBase {
    pub msg_id: UniqueId,
    pub timestamp: Timestamp,
    pub source_id: UniqueId,
}

impl MsgBase {
    pub fn new(msg_id: UniqueId, timestamp: Timestamp, source_id: UniqueId) -> Self {
        Self { msg_id, timestamp, source_id }
    }
}

/// Row batch appended to a segment. `timestamps`, `row_ids` and
/// `row_data` are parallel, one entry per row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub base: MsgBase,
    pub collection_name: String,
    pub partition_name: String,
    pub segment_id: UniqueId,
    pub channel_id: String,
    pub timestamps: Vec<Timestamp>,
    pub row_ids: Vec<UniqueId>,
    pub row_data: Vec<Vec<u8>>,
}

impl InsertRequest {
    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }
}

/// Deletion by primary key; `timestamps` and `primary_keys` are parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub base: MsgBase,
    pub collection_name: String,
    pub channel_id: String,
    pub timestamps: Vec<Timestamp>,
    pub primary_keys: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub base: MsgBase,
    pub collection_name: String,
    pub result_channel_id: String,
    pub dsl: String,
    pub placeholder_group: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    Success,
    UnexpectedError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub error_code: ErrorCode,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub base: MsgBase,
    pub status: Status,
    pub result_channel_id: String,
    pub hits: Vec<Vec<u8>>,
}

/// Barrier payload. Carries nothing but the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTickRequest {
    pub base: MsgBase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub segment_id: UniqueId,
    pub memory_size: i64,
    pub num_rows: i64,
    pub recently_modified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryNodeStats {
    pub base: MsgBase,
    pub seg_stats: Vec<SegmentStats>,
}

/// Variant-specific part of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgBody {
    Insert(InsertRequest),
    Delete(DeleteRequest),
    Search(SearchRequest),
    SearchResult(SearchResults),
    TimeTick(TimeTickRequest),
    QueryNodeStats(QueryNodeStats),
}

impl MsgBody {
    pub fn msg_type(&self) -> MsgType {
        match self {
            MsgBody::Insert(_) => MsgType::Insert,
            MsgBody::Delete(_) => MsgType::Delete,
            MsgBody::Search(_) => MsgType::Search,
            MsgBody::SearchResult(_) => MsgType::SearchResult,
            MsgBody::TimeTick(_) => MsgType::TimeTick,
            MsgBody::QueryNodeStats(_) => MsgType::QueryNodeStats,
        }
    }

    pub fn base(&self) -> &MsgBase {
        match self {
            MsgBody::Insert(r) => &r.base,
            MsgBody::Delete(r) => &r.base,
            MsgBody::Search(r) => &r.base,
            MsgBody::SearchResult(r) => &r.base,
            MsgBody::TimeTick(r) => &r.base,
            MsgBody::QueryNodeStats(r) => &r.base,
        }
    }
}

/// A payload type with a fixed tag. Implemented by every request struct
/// so the dispatcher can register one constructor per tag.
pub trait MsgPayload: Serialize + DeserializeOwned + Sized {
    const MSG_TYPE: MsgType;

    fn into_body(self) -> MsgBody;
}

macro_rules! impl_payload {
    ($ty:ty, $variant:ident) => {
        impl MsgPayload for $ty {
            const MSG_TYPE: MsgType = MsgType::$variant;

            fn into_body(self) -> MsgBody {
                MsgBody::$variant(self)
            }
        }
    };
}

impl_payload!(InsertRequest, Insert);
impl_payload!(DeleteRequest, Delete);
impl_payload!(SearchRequest, Search);
impl_payload!(SearchResults, SearchResult);
impl_payload!(TimeTickRequest, TimeTick);
impl_payload!(QueryNodeStats, QueryNodeStats);

// ════════════════════════════════════════════════════════════════
//  TsMsg
// ════════════════════════════════════════════════════════════════

/// Timestamped domain message exchanged over a stream.
///
/// `begin_ts..=end_ts` is the time range the message covers; the time-tick
/// stream orders data messages by `begin_ts` and reads barrier values from
/// a TimeTick's `end_ts`. `hash_values` drive repacking. `position` is set
/// by the consuming stream and never encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TsMsg {
    pub begin_ts: Timestamp,
    pub end_ts: Timestamp,
    pub hash_values: Vec<u32>,
    pub body: MsgBody,
    pub position: Option<Position>,
}

#[derive(Serialize)]
struct WireRef<'a, P> {
    begin_ts: Timestamp,
    end_ts: Timestamp,
    hash_values: &'a [u32],
    body: &'a P,
}

#[derive(Deserialize)]
struct Wire<P> {
    begin_ts: Timestamp,
    end_ts: Timestamp,
    #[serde(default)]
    hash_values: Vec<u32>,
    body: P,
}

impl TsMsg {
    /// Message covering the single instant of its header timestamp.
    pub fn new(body: MsgBody, hash_values: Vec<u32>) -> Self {
        let ts = body.base().timestamp;
        Self::with_range(body, hash_values, ts, ts)
    }

    pub fn with_range(body: MsgBody, hash_values: Vec<u32>, begin_ts: Timestamp, end_ts: Timestamp) -> Self {
        Self {
            begin_ts,
            end_ts,
            hash_values,
            body,
            position: None,
        }
    }

    /// Barrier message for tick `ts`. Broadcast, so it needs no hash keys.
    pub fn time_tick(msg_id: UniqueId, ts: Timestamp) -> Self {
        let body = MsgBody::TimeTick(TimeTickRequest { base: MsgBase::new(msg_id, ts, msg_id) });
        Self::new(body, Vec::new())
    }

    pub fn msg_type(&self) -> MsgType {
        self.body.msg_type()
    }

    pub fn id(&self) -> UniqueId {
        self.body.base().msg_id
    }

    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    pub fn end_ts(&self) -> Timestamp {
        self.end_ts
    }

    pub fn hash_keys(&self) -> &[u32] {
        &self.hash_values
    }

    pub fn is_time_tick(&self) -> bool {
        matches!(self.body, MsgBody::TimeTick(_))
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Encode everything except the position.
    pub fn marshal(&self) -> Result<Vec<u8>, MqError> {
        match &self.body {
            MsgBody::Insert(p) => self.encode(p),
            MsgBody::Delete(p) => self.encode(p),
            MsgBody::Search(p) => self.encode(p),
            MsgBody::SearchResult(p) => self.encode(p),
            MsgBody::TimeTick(p) => self.encode(p),
            MsgBody::QueryNodeStats(p) => self.encode(p),
        }
    }

    /// Decode a payload produced by `marshal` for a message of type `P`.
    pub fn unmarshal<P: MsgPayload>(payload: &[u8]) -> Result<TsMsg, MqError> {
        let wire: Wire<P> = serde_json::from_slice(payload)
            .map_err(|e| MqError::from(e).with_context(format!("unmarshal {}", P::MSG_TYPE)))?;
        if wire.begin_ts > wire.end_ts {
            return Err(MqError::format_err(format!(
                "unmarshal {}: begin_ts {} > end_ts {}",
                P::MSG_TYPE,
                wire.begin_ts,
                wire.end_ts
            )));
        }
        Ok(TsMsg::with_range(wire.body.into_body(), wire.hash_values, wire.begin_ts, wire.end_ts))
    }

    fn encode<P: Serialize>(&self, body: &P) -> Result<Vec<u8>, MqError> {
        let wire = WireRef {
            begin_ts: self.begin_ts,
            end_ts: self.end_ts,
            hash_values: &self.hash_values,
            body,
        };
        Ok(serde_json::to_vec(&wire)?)
    }
}
