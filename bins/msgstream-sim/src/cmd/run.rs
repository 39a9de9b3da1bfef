use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use mq_memory::MemoryMqFactory;
use msgstream::{MqMsgStream, MqTtMsgStream, MsgStream, UnmarshalDispatcher};
use msgstream_api::{MqClientFactory, MsgCodec, MsgPack, Timestamp, TsMsg, UniqueId};

use super::config::Effective;
use super::domain::{Rng, insert_batch};
use super::error::SimError;

// ═══════════════════════════════════════════════════════════════
//  Main dispatch
// ═══════════════════════════════════════════════════════════════

pub async fn run(args: &Effective) -> Result<(), SimError> {
    tracing::info!(
        channels = args.channels,
        ticks = args.ticks,
        inserts_per_tick = args.inserts_per_tick,
        resume = args.resume,
        "msgstream-sim starting"
    );

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            shutdown.cancel();
        }
    });

    let client = MemoryMqFactory.create(&args.mq_config_json)?;
    let codec: Arc<dyn MsgCodec> = Arc::new(UnmarshalDispatcher::default());
    let channels: Vec<String> = (0..args.channels).map(|i| format!("sim-{i}")).collect();

    let mut input = MqMsgStream::new(client.clone(), codec.clone(), args.stream.clone(), &token);
    input.as_producer(&channels).await?;
    let mut output = MqTtMsgStream::new(client.clone(), codec.clone(), args.stream.clone(), &token);
    output.as_consumer(&channels, &args.subscription).await?;

    let workload = Workload {
        seed: args.seed,
        ticks: args.ticks,
        tick_interval: args.tick_interval,
        inserts_per_tick: args.inserts_per_tick,
    };
    let producer_token = token.clone();
    let producer = tokio::spawn(async move {
        let result = produce(input, workload).await;
        if result.is_err() {
            producer_token.cancel();
        }
        result
    });

    let last_tick = args.ticks * args.tick_interval;
    let resume_at = (args.ticks / 2).max(1) * args.tick_interval;
    let mut verifier = Verifier::default();
    let mut resumed = false;
    loop {
        let pack = match output.consume().await {
            Ok(pack) => pack,
            Err(e) => {
                if producer.is_finished() {
                    producer.await??;
                }
                return Err(e.into());
            }
        };
        verifier.check(&pack)?;
        if pack.end_ts >= last_tick {
            break;
        }

        if args.resume && !resumed && pack.end_ts >= resume_at {
            output.close().await;
            output = MqTtMsgStream::new(client.clone(), codec.clone(), args.stream.clone(), &token);
            output.resume_from(&pack.end_positions).await?;
            resumed = true;
            tracing::info!(tick = pack.end_ts, "consumer resumed from recorded positions");
        }
    }
    output.close().await;

    let produced = producer.await??;
    verifier.finish(&produced)?;
    tracing::info!(
        packs = verifier.packs,
        msgs = verifier.seen.len(),
        resumed,
        "simulation verified"
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct Workload {
    seed: i64,
    ticks: u64,
    tick_interval: u64,
    inserts_per_tick: usize,
}

/// Inserts in `(prev_tick, tick]`, then the tick itself on every channel.
async fn produce(mut input: MqMsgStream, workload: Workload) -> Result<BTreeSet<UniqueId>, SimError> {
    let mut rng = Rng::new(workload.seed);
    let mut next_id: UniqueId = 1;
    let mut produced = BTreeSet::new();
    let mut prev_tick = 0;

    for k in 1..=workload.ticks {
        let tick = k * workload.tick_interval;
        let batch = insert_batch(&mut rng, &mut next_id, prev_tick, tick, workload.inserts_per_tick);
        produced.extend(batch.msgs.iter().map(TsMsg::id));
        input.produce(&batch).await?;
        input
            .broadcast(&MsgPack::new(vec![TsMsg::time_tick(tick as UniqueId, tick)]))
            .await?;
        tracing::debug!(tick, inserts = batch.len(), "tick broadcast");
        prev_tick = tick;
    }

    input.close().await;
    Ok(produced)
}

// ═══════════════════════════════════════════════════════════════
//  Verifier
// ═══════════════════════════════════════════════════════════════

/// Checks consecutive packs: contiguous tick intervals, every message
/// inside its pack's interval, no time tick as data, no duplicates.
#[derive(Default)]
struct Verifier {
    prev_end: Timestamp,
    packs: usize,
    seen: BTreeSet<UniqueId>,
}

impl Verifier {
    fn check(&mut self, pack: &MsgPack) -> Result<(), SimError> {
        if pack.begin_ts != self.prev_end {
            return Err(SimError::Check(format!(
                "pack starts at {} but the previous one ended at {}",
                pack.begin_ts, self.prev_end
            )));
        }
        if pack.end_ts <= pack.begin_ts {
            return Err(SimError::Check(format!("empty interval ({}, {}]", pack.begin_ts, pack.end_ts)));
        }
        for msg in &pack.msgs {
            if msg.is_time_tick() {
                return Err(SimError::Check(format!("time tick {} delivered as data", msg.end_ts())));
            }
            if msg.begin_ts() <= pack.begin_ts || msg.begin_ts() > pack.end_ts {
                return Err(SimError::Check(format!(
                    "message {} at {} outside ({}, {}]",
                    msg.id(),
                    msg.begin_ts(),
                    pack.begin_ts,
                    pack.end_ts
                )));
            }
            if !self.seen.insert(msg.id()) {
                return Err(SimError::Check(format!("message {} delivered twice", msg.id())));
            }
        }
        self.prev_end = pack.end_ts;
        self.packs += 1;
        tracing::debug!(begin_ts = pack.begin_ts, end_ts = pack.end_ts, msgs = pack.len(), "pack verified");
        Ok(())
    }

    fn finish(&self, produced: &BTreeSet<UniqueId>) -> Result<(), SimError> {
        if &self.seen != produced {
            let missing = produced.difference(&self.seen).count();
            return Err(SimError::Check(format!(
                "consumed {} of {} produced messages ({missing} missing)",
                self.seen.len(),
                produced.len()
            )));
        }
        Ok(())
    }
}
