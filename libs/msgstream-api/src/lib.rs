//! Contracts shared by streams, codecs and MQ backends: the message model,
//! `MsgPack`, `Position` and the MQ client traits.

pub mod error;
pub mod message;
pub mod mq;
pub mod pack;
pub mod types;

pub use error::{ErrorKind, MqError};
pub use message::{
    DeleteRequest, ErrorCode, InsertRequest, MsgBase, MsgBody, MsgPayload, QueryNodeStats,
    SearchRequest, SearchResults, SegmentStats, Status, TimeTickRequest, TsMsg,
};
pub use mq::{BoxFuture, ConsumerMessage, MqClient, MqClientFactory, MqConsumer, MqProducer, MsgCodec};
pub use pack::MsgPack;
pub use types::{MSG_TYPE_PROPERTY, MessageId, MsgType, Position, Properties, Timestamp, UniqueId};
