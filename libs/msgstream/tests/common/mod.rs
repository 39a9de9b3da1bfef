#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mq_memory::MemoryMq;
use msgstream::{MqMsgStream, MqTtMsgStream, MsgStream, StreamConfig, UnmarshalDispatcher};
use msgstream_api::{
    DeleteRequest, ErrorCode, InsertRequest, MessageId, MsgBase, MsgBody, MsgCodec, MsgPack, MsgType, QueryNodeStats,
    SearchRequest, SearchResults, Status, TimeTickRequest, Timestamp, TsMsg, UniqueId,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn channels(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}-{i}")).collect()
}

pub fn codec() -> Arc<dyn MsgCodec> {
    Arc::new(UnmarshalDispatcher::default())
}

pub fn config() -> StreamConfig {
    StreamConfig { receive_buffer: 100 }
}

/// Id past the end of any channel used in the tests.
pub fn beyond_end() -> MessageId {
    MessageId::new(999u64.to_be_bytes().to_vec())
}

pub async fn input_stream(mq: &MemoryMq, chans: &[String], token: &CancellationToken) -> MqMsgStream {
    let mut stream = MqMsgStream::new(Arc::new(mq.clone()), codec(), config(), token);
    stream.as_producer(chans).await.unwrap();
    stream
}

pub async fn output_stream(mq: &MemoryMq, chans: &[String], sub: &str, token: &CancellationToken) -> MqMsgStream {
    let mut stream = MqMsgStream::new(Arc::new(mq.clone()), codec(), config(), token);
    stream.as_consumer(chans, sub).await.unwrap();
    stream
}

pub async fn tt_output_stream(
    mq: &MemoryMq,
    chans: &[String],
    sub: &str,
    token: &CancellationToken,
) -> MqTtMsgStream {
    tt_output_stream_with(mq, chans, sub, token, config()).await
}

pub async fn tt_output_stream_with(
    mq: &MemoryMq,
    chans: &[String],
    sub: &str,
    token: &CancellationToken,
    config: StreamConfig,
) -> MqTtMsgStream {
    let mut stream = MqTtMsgStream::new(Arc::new(mq.clone()), codec(), config, token);
    stream.as_consumer(chans, sub).await.unwrap();
    stream
}

/// Single-row message of `msg_type` at timestamp `req_id`, hashed by `req_id`.
pub fn ts_msg(msg_type: MsgType, req_id: UniqueId) -> TsMsg {
    let ts = req_id as Timestamp;
    let base = MsgBase::new(req_id, ts, req_id);
    let body = match msg_type {
        MsgType::Insert => MsgBody::Insert(InsertRequest {
            base,
            collection_name: "Collection".into(),
            partition_name: "Partition".into(),
            segment_id: 1,
            channel_id: "0".into(),
            timestamps: vec![ts],
            row_ids: vec![1],
            row_data: vec![Vec::new()],
        }),
        MsgType::Delete => MsgBody::Delete(DeleteRequest {
            base,
            collection_name: "Collection".into(),
            channel_id: "1".into(),
            timestamps: vec![ts],
            primary_keys: vec![1],
        }),
        MsgType::Search => MsgBody::Search(SearchRequest {
            base,
            result_channel_id: "0".into(),
            ..Default::default()
        }),
        MsgType::SearchResult => MsgBody::SearchResult(SearchResults {
            base,
            status: Status { error_code: ErrorCode::Success, reason: String::new() },
            result_channel_id: "0".into(),
            hits: Vec::new(),
        }),
        MsgType::TimeTick => MsgBody::TimeTick(TimeTickRequest { base }),
        MsgType::QueryNodeStats => MsgBody::QueryNodeStats(QueryNodeStats { base, seg_stats: Vec::new() }),
    };
    TsMsg::new(body, vec![req_id as u32])
}

pub fn insert_pack(ids: &[UniqueId]) -> MsgPack {
    MsgPack::new(ids.iter().map(|&id| ts_msg(MsgType::Insert, id)).collect())
}

pub fn tick_pack(ts: Timestamp) -> MsgPack {
    MsgPack::new(vec![TsMsg::time_tick(ts as UniqueId, ts)])
}

/// Consume until `n` messages arrived.
pub async fn receive<S: MsgStream>(stream: &mut S, n: usize) -> Vec<TsMsg> {
    let mut got = Vec::new();
    while got.len() < n {
        let pack = tokio::time::timeout(WAIT, stream.consume())
            .await
            .expect("timed out waiting for messages")
            .unwrap();
        got.extend(pack.msgs);
    }
    got
}

pub async fn next_pack<S: MsgStream>(stream: &mut S) -> MsgPack {
    tokio::time::timeout(WAIT, stream.consume())
        .await
        .expect("timed out waiting for a pack")
        .unwrap()
}

/// Nothing more arrives within a short grace period.
pub async fn assert_quiet<S: MsgStream>(stream: &mut S) {
    let more = tokio::time::timeout(Duration::from_millis(50), stream.consume()).await;
    assert!(more.is_err(), "unexpected extra pack: {more:?}");
}

pub fn sorted_ids(msgs: &[TsMsg]) -> Vec<UniqueId> {
    let mut ids: Vec<UniqueId> = msgs.iter().map(TsMsg::id).collect();
    ids.sort();
    ids
}
