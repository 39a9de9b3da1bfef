mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::*;
use mq_memory::MemoryMq;
use msgstream::{MqTtMsgStream, MsgStream, StreamConfig, StreamError};
use msgstream_api::{MessageId, MsgPack, Position, Timestamp, TsMsg, UniqueId};

fn assert_within_bounds(pack: &MsgPack) {
    for msg in &pack.msgs {
        assert!(!msg.is_time_tick(), "time tick delivered as data");
        assert!(
            pack.begin_ts < msg.begin_ts() && msg.begin_ts() <= pack.end_ts,
            "message at {} outside ({}, {}]",
            msg.begin_ts(),
            pack.begin_ts,
            pack.end_ts
        );
    }
}

#[tokio::test]
async fn inserts_between_ticks_form_one_pack() {
    for n in 1..=3 {
        let mq = MemoryMq::default();
        let token = CancellationToken::new();
        let chans = channels(&format!("tt{n}"), n);

        let input = input_stream(&mq, &chans, &token).await;
        let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;

        input.broadcast(&tick_pack(0)).await.unwrap();
        input.produce(&insert_pack(&[1, 3])).await.unwrap();
        input.broadcast(&tick_pack(5)).await.unwrap();

        let pack = next_pack(&mut output).await;
        assert_eq!((pack.begin_ts, pack.end_ts), (0, 5));
        assert_eq!(sorted_ids(&pack.msgs), vec![1, 3]);
        assert_eq!(pack.end_positions.len(), n);

        let more = tokio::time::timeout(Duration::from_millis(50), output.consume()).await;
        assert!(more.is_err(), "no further tick, so no further pack");
    }
}

/// Inserts spread over (k*10, k*10 + 22) before tick (k+1)*10, so some of
/// them land after the next tick and must be held back.
async fn produce_overlapping(input: &impl MsgStream) -> BTreeSet<UniqueId> {
    let mut produced = BTreeSet::new();
    for k in 0..5u64 {
        let ids: Vec<UniqueId> = (0..5).map(|j| (k * 10 + 1 + j * 4 + k % 2) as UniqueId).collect();
        produced.extend(ids.iter().copied());
        input.produce(&insert_pack(&ids)).await.unwrap();
        input.broadcast(&tick_pack((k + 1) * 10)).await.unwrap();
    }
    input.broadcast(&tick_pack(100)).await.unwrap();
    produced
}

#[tokio::test]
async fn packs_respect_tick_bounds_and_lose_nothing() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("bounds", 2);

    let input = input_stream(&mq, &chans, &token).await;
    let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;
    let produced = produce_overlapping(&input).await;

    let mut consumed: Vec<TsMsg> = Vec::new();
    let mut ends: Vec<Timestamp> = Vec::new();
    let mut prev_end = 0;
    loop {
        let pack = next_pack(&mut output).await;
        assert_within_bounds(&pack);
        assert_eq!(pack.begin_ts, prev_end);
        prev_end = pack.end_ts;
        ends.push(pack.end_ts);
        consumed.extend(pack.msgs);
        if prev_end == 100 {
            break;
        }
    }

    assert_eq!(ends, vec![10, 20, 30, 40, 50, 100]);
    let ids: Vec<UniqueId> = consumed.iter().map(TsMsg::id).collect();
    let distinct: BTreeSet<UniqueId> = ids.iter().copied().collect();
    assert_eq!(ids.len(), distinct.len(), "duplicate delivery");
    assert_eq!(distinct, produced);
}

#[tokio::test]
async fn fresh_stream_resumes_from_end_positions() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("resume", 2);

    let input = input_stream(&mq, &chans, &token).await;
    let produced = produce_overlapping(&input).await;

    // One stream per pack, each resuming where the last one ended.
    let mut consumed = Vec::new();
    let mut last: Option<MsgPack> = None;
    for round in 0..6 {
        let mut output = tt_output_stream(&mq, &chans, &format!("round-{round}"), &token).await;
        if let Some(prev) = &last {
            output.seek(&prev.end_positions).await.unwrap();
        }
        let pack = next_pack(&mut output).await;
        assert_within_bounds(&pack);
        if let Some(prev) = &last {
            assert_eq!(pack.begin_ts, prev.end_ts);
            assert_eq!(pack.start_positions, prev.end_positions);
        }
        consumed.extend(pack.msgs.iter().map(TsMsg::id));
        output.close().await;
        last = Some(pack);
    }

    assert_eq!(last.unwrap().end_ts, 100);
    assert_eq!(consumed.iter().copied().collect::<BTreeSet<_>>(), produced);
    assert_eq!(consumed.len(), produced.len());
}

#[tokio::test]
async fn seek_after_pack_ending_at_twenty() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("twenty", 2);

    let input = input_stream(&mq, &chans, &token).await;
    for tick in (10..=100).step_by(10) {
        input.produce(&insert_pack(&[tick as UniqueId - 5])).await.unwrap();
        input.broadcast(&tick_pack(tick)).await.unwrap();
    }

    let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;
    let mut at_twenty = next_pack(&mut output).await;
    while at_twenty.end_ts < 20 {
        at_twenty = next_pack(&mut output).await;
    }
    assert_eq!(at_twenty.end_ts, 20);

    // Same stream: move on, then rewind.
    next_pack(&mut output).await;
    next_pack(&mut output).await;
    output.seek(&at_twenty.end_positions).await.unwrap();
    let again = next_pack(&mut output).await;
    assert_eq!((again.begin_ts, again.end_ts), (20, 30));
    assert_eq!(sorted_ids(&again.msgs), vec![25]);

    // Fresh stream from the persisted positions.
    let mut resumed = tt_output_stream(&mq, &chans, "other", &token).await;
    resumed.seek(&at_twenty.end_positions).await.unwrap();
    let next = next_pack(&mut resumed).await;
    assert_eq!((next.begin_ts, next.end_ts), (20, 30));
    assert_eq!(sorted_ids(&next.msgs), vec![25]);
}

#[tokio::test]
async fn seek_keeps_messages_past_the_cut() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("held", 2);

    let input = input_stream(&mq, &chans, &token).await;
    let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;

    input.broadcast(&tick_pack(0)).await.unwrap();
    input.produce(&insert_pack(&[1, 19])).await.unwrap();
    input.broadcast(&tick_pack(5)).await.unwrap();
    input.produce(&insert_pack(&[14, 9])).await.unwrap();
    input.broadcast(&tick_pack(11)).await.unwrap();

    assert_eq!(sorted_ids(&next_pack(&mut output).await.msgs), vec![1]);
    let second = next_pack(&mut output).await;
    assert_eq!((second.begin_ts, second.end_ts), (5, 11));
    assert_eq!(sorted_ids(&second.msgs), vec![9]);
    output.close().await;

    let mut resumed = tt_output_stream(&mq, &chans, "resumed", &token).await;
    resumed.seek(&second.end_positions).await.unwrap();
    input.broadcast(&tick_pack(15)).await.unwrap();

    let pack = next_pack(&mut resumed).await;
    assert_eq!((pack.begin_ts, pack.end_ts), (11, 15));
    assert_eq!(sorted_ids(&pack.msgs), vec![14]);
}

#[tokio::test]
async fn closed_channels_flush_remaining_data() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("flush", 2);

    let input = input_stream(&mq, &chans, &token).await;
    let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;

    input.produce(&insert_pack(&[3])).await.unwrap();
    input.broadcast(&tick_pack(10)).await.unwrap();
    input.produce(&insert_pack(&[12, 15])).await.unwrap();
    for name in &chans {
        mq.close_channel(name);
    }

    let first = next_pack(&mut output).await;
    assert_eq!((first.begin_ts, first.end_ts), (0, 10));
    assert_eq!(sorted_ids(&first.msgs), vec![3]);

    let last = next_pack(&mut output).await;
    assert_eq!((last.begin_ts, last.end_ts), (10, 15));
    assert_eq!(sorted_ids(&last.msgs), vec![12, 15]);

    let done = tokio::time::timeout(WAIT, output.consume()).await.unwrap();
    assert!(matches!(done, Err(StreamError::Closed)));
}

#[tokio::test]
async fn close_and_cancel_end_consumption() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("stop", 2);

    let mut closed = tt_output_stream(&mq, &chans, "a", &token).await;
    closed.close().await;
    closed.close().await;
    assert!(matches!(closed.consume().await, Err(StreamError::Closed)));

    let mut waiting = tt_output_stream(&mq, &chans, "b", &token).await;
    let pending = tokio::spawn(async move { waiting.consume().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(StreamError::Closed)));
}

#[tokio::test]
async fn failed_seek_keeps_pending_pack() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("ttbad", 2);

    let input = input_stream(&mq, &chans, &token).await;
    let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;
    input.broadcast(&tick_pack(0)).await.unwrap();
    input.produce(&insert_pack(&[1, 3])).await.unwrap();
    input.broadcast(&tick_pack(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let positions = [
        Position::new("ttbad-0", MessageId::earliest(), "sub", 0),
        Position::new("ttbad-1", beyond_end(), "sub", 0),
    ];
    assert!(matches!(output.seek(&positions).await, Err(StreamError::Transport { .. })));

    let pack = next_pack(&mut output).await;
    assert_eq!((pack.begin_ts, pack.end_ts), (0, 5));
    assert_eq!(sorted_ids(&pack.msgs), vec![1, 3]);
    assert_quiet(&mut output).await;
}

#[tokio::test]
async fn one_slot_buffer_with_seek_loses_and_repeats_nothing() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("narrow", 3);

    let input = input_stream(&mq, &chans, &token).await;
    let produced = produce_overlapping(&input).await;
    let mut output =
        tt_output_stream_with(&mq, &chans, "sub", &token, StreamConfig { receive_buffer: 1 }).await;

    let mut consumed: Vec<UniqueId> = Vec::new();
    let mut at_twenty = next_pack(&mut output).await;
    consumed.extend(at_twenty.msgs.iter().map(TsMsg::id));
    while at_twenty.end_ts < 20 {
        at_twenty = next_pack(&mut output).await;
        consumed.extend(at_twenty.msgs.iter().map(TsMsg::id));
    }

    // Read ahead, then rewind: everything after 20 comes again once.
    next_pack(&mut output).await;
    output.seek(&at_twenty.end_positions).await.unwrap();

    let mut prev_end = 20;
    while prev_end < 100 {
        let pack = next_pack(&mut output).await;
        assert_within_bounds(&pack);
        assert_eq!(pack.begin_ts, prev_end);
        prev_end = pack.end_ts;
        consumed.extend(pack.msgs.iter().map(TsMsg::id));
    }

    let distinct: BTreeSet<UniqueId> = consumed.iter().copied().collect();
    assert_eq!(consumed.len(), distinct.len(), "duplicate delivery");
    assert_eq!(distinct, produced);
}

#[tokio::test]
async fn fresh_stream_resumes_from_positions_alone() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("ttalone", 2);

    let input = input_stream(&mq, &chans, &token).await;
    for tick in (10..=40).step_by(10) {
        input.produce(&insert_pack(&[tick as UniqueId - 5])).await.unwrap();
        input.broadcast(&tick_pack(tick)).await.unwrap();
    }

    let mut output = tt_output_stream(&mq, &chans, "sub", &token).await;
    let first = next_pack(&mut output).await;
    let second = next_pack(&mut output).await;
    assert_eq!((first.end_ts, second.end_ts), (10, 20));
    output.close().await;

    let mut resumed = MqTtMsgStream::new(Arc::new(mq.clone()), codec(), config(), &token);
    resumed.resume_from(&second.end_positions).await.unwrap();
    let next = next_pack(&mut resumed).await;
    assert_eq!((next.begin_ts, next.end_ts), (20, 30));
    assert_eq!(sorted_ids(&next.msgs), vec![25]);
    assert_eq!(next.start_positions, second.end_positions);
}

#[tokio::test]
async fn producer_handle_feeds_pending_consume() {
    let mq = MemoryMq::default();
    let token = CancellationToken::new();
    let chans = channels("ttduplex", 2);

    let mut stream = MqTtMsgStream::new(Arc::new(mq.clone()), codec(), config(), &token);
    stream.as_producer(&chans).await.unwrap();
    stream.as_consumer(&chans, "sub").await.unwrap();
    let handle = stream.producer().unwrap();

    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.produce(&insert_pack(&[1, 3])).await.unwrap();
        handle.broadcast(&tick_pack(5)).await.unwrap();
    });
    let pack = next_pack(&mut stream).await;
    writer.await.unwrap();

    assert_eq!((pack.begin_ts, pack.end_ts), (0, 5));
    assert_eq!(sorted_ids(&pack.msgs), vec![1, 3]);
}
