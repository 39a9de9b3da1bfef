use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use msgstream_api::{BoxFuture, MessageId, MqClient, MqConsumer, MqError, MsgCodec, MsgPack, Position, TsMsg};

use crate::forward::{Event, Forwarded, Stopped, spawn_forwarder};
use crate::repack::RepackFunc;
use crate::{MsgProducer, MsgStream, StreamConfig, StreamError};

struct ConsumerChannel {
    name: String,
    epoch: u64,
    eof: bool,
    token: CancellationToken,
    task: Option<JoinHandle<Stopped>>,
}

// ═══════════════════════════════════════════════════════════════
//  MqMsgStream
// ═══════════════════════════════════════════════════════════════

/// Base multiplexed stream.
///
/// Each bound consumer channel is owned by one forwarding task that feeds
/// a shared bounded buffer; `consume` drains that buffer. Order is kept
/// per channel only. The send side lives in a [`MsgProducer`] so it can be
/// driven while `consume` is pending.
pub struct MqMsgStream {
    client: Arc<dyn MqClient>,
    codec: Arc<dyn MsgCodec>,
    repack: RepackFunc,
    outbound: Option<MsgProducer>,
    consumers: Vec<ConsumerChannel>,
    subscription: String,
    merge_tx: mpsc::Sender<Forwarded>,
    merge_rx: mpsc::Receiver<Forwarded>,
    token: CancellationToken,
    closed: bool,
}

impl MqMsgStream {
    /// Cancelling `token` stops the forwarders and fails a pending
    /// `consume` with `Closed`.
    pub fn new(
        client: Arc<dyn MqClient>,
        codec: Arc<dyn MsgCodec>,
        config: StreamConfig,
        token: &CancellationToken,
    ) -> Self {
        let (merge_tx, merge_rx) = mpsc::channel(config.receive_buffer.max(1));
        Self {
            client,
            codec,
            repack: Arc::new(crate::default_repack),
            outbound: None,
            consumers: Vec::new(),
            subscription: String::new(),
            merge_tx,
            merge_rx,
            token: token.child_token(),
            closed: false,
        }
    }

    pub fn producer_channels(&self) -> Vec<String> {
        self.outbound.as_ref().map(MsgProducer::channels).unwrap_or_default()
    }

    /// Handle on the send side, usable concurrently with `consume`.
    pub fn producer(&self) -> Result<MsgProducer, StreamError> {
        self.ensure_open()?;
        self.outbound().cloned()
    }

    fn outbound(&self) -> Result<&MsgProducer, StreamError> {
        self.outbound
            .as_ref()
            .ok_or_else(|| StreamError::config("produce before as_producer"))
    }

    pub fn consumer_channels(&self) -> Vec<String> {
        self.consumers.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.token.is_cancelled()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────
    //  Merge buffer
    // ───────────────────────────────────────────────────────────

    /// Next live event, waiting if the buffer is empty.
    pub(crate) async fn next_event(&mut self) -> Result<(usize, Event), StreamError> {
        loop {
            self.ensure_open()?;
            if self.consumers.is_empty() {
                return Err(StreamError::config("consume before as_consumer"));
            }
            if self.consumers.iter().all(|c| c.eof) {
                return Err(StreamError::Closed);
            }
            let item = tokio::select! {
                item = self.merge_rx.recv() => item,
                _ = self.token.cancelled() => return Err(StreamError::Closed),
            };
            let Some(item) = item else {
                return Err(StreamError::Closed);
            };
            if let Some(event) = self.accept(item) {
                return Ok(event);
            }
        }
    }

    /// Next live event if one is already buffered.
    pub(crate) fn try_next_event(&mut self) -> Option<(usize, Event)> {
        loop {
            let item = self.merge_rx.try_recv().ok()?;
            if let Some(event) = self.accept(item) {
                return Some(event);
            }
        }
    }

    fn accept(&mut self, item: Forwarded) -> Option<(usize, Event)> {
        let ch = self.consumers.get_mut(item.channel)?;
        if ch.epoch != item.epoch {
            // Read before the last seek of this channel.
            return None;
        }
        if matches!(item.event, Event::Eof) {
            ch.eof = true;
        }
        Some((item.channel, item.event))
    }

    // ───────────────────────────────────────────────────────────
    //  Forwarders
    // ───────────────────────────────────────────────────────────

    /// A repositioned channel gets a new epoch, so whatever its previous
    /// forwarder left in the merge buffer is discarded.
    fn start_forwarder(&mut self, idx: usize, consumer: Box<dyn MqConsumer>, cursor: MessageId, repositioned: bool) {
        let ch = &mut self.consumers[idx];
        if repositioned {
            ch.epoch += 1;
            ch.eof = false;
        }
        ch.token = self.token.child_token();
        ch.task = Some(spawn_forwarder(
            idx,
            ch.epoch,
            consumer,
            cursor,
            self.subscription.clone(),
            self.codec.clone(),
            self.merge_tx.clone(),
            ch.token.clone(),
        ));
    }

    async fn stop_forwarder(&mut self, idx: usize) -> Result<Stopped, StreamError> {
        let ch = &mut self.consumers[idx];
        ch.token.cancel();
        let task = ch
            .task
            .take()
            .ok_or_else(|| StreamError::transport(&ch.name, MqError::io("consumer lost")))?;
        task.await.map_err(|e| {
            tracing::error!(channel = %ch.name, error = ?e, "forwarding task failed");
            StreamError::transport(&ch.name, MqError::io(format!("forwarding task failed: {e}")))
        })
    }

    /// Channel index per position. Unbound or repeated channels are
    /// rejected before any consumer is touched.
    fn seek_targets<'a>(&self, positions: &'a [Position]) -> Result<Vec<(usize, &'a Position)>, StreamError> {
        let mut targets: Vec<(usize, &Position)> = Vec::with_capacity(positions.len());
        for pos in positions {
            let idx = self
                .consumers
                .iter()
                .position(|c| c.name == pos.channel_name)
                .ok_or_else(|| StreamError::config(format!("seek on unbound channel '{}'", pos.channel_name)))?;
            if targets.iter().any(|&(seen, _)| seen == idx) {
                return Err(StreamError::config(format!(
                    "channel '{}' appears twice in seek positions",
                    pos.channel_name
                )));
            }
            targets.push((idx, pos));
        }
        Ok(targets)
    }
}

impl Drop for MqMsgStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Batch of whatever was buffered. Bounds and positions are taken from the
/// messages themselves.
fn batch(msgs: Vec<TsMsg>) -> MsgPack {
    let begin_ts = msgs.iter().map(TsMsg::begin_ts).min().unwrap_or(0);
    let end_ts = msgs.iter().map(TsMsg::end_ts).max().unwrap_or(0);
    let mut start_positions: Vec<Position> = Vec::new();
    let mut end_positions: Vec<Position> = Vec::new();
    for pos in msgs.iter().filter_map(TsMsg::position) {
        match end_positions.iter_mut().find(|p| p.channel_name == pos.channel_name) {
            Some(last) => *last = pos.clone(),
            None => {
                start_positions.push(pos.clone());
                end_positions.push(pos.clone());
            }
        }
    }
    MsgPack {
        begin_ts,
        end_ts,
        msgs,
        start_positions,
        end_positions,
    }
}

impl MsgStream for MqMsgStream {
    fn as_producer<'a>(&'a mut self, channels: &'a [String]) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.ensure_open()?;
            if channels.is_empty() {
                return Err(StreamError::config("as_producer needs at least one channel"));
            }
            if self.outbound.is_some() {
                return Err(StreamError::config("producers already bound"));
            }
            let mut producers = Vec::with_capacity(channels.len());
            for name in channels {
                let producer = self
                    .client
                    .create_producer(name)
                    .await
                    .map_err(|e| StreamError::transport(name, e))?;
                producers.push(producer);
            }
            self.outbound = Some(MsgProducer::new(
                producers,
                self.codec.clone(),
                self.repack.clone(),
                self.token.clone(),
            ));
            tracing::info!(channels = ?channels, "producers bound");
            Ok(())
        })
    }

    fn as_consumer<'a>(
        &'a mut self,
        channels: &'a [String],
        subscription: &'a str,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.ensure_open()?;
            if channels.is_empty() {
                return Err(StreamError::config("as_consumer needs at least one channel"));
            }
            if !self.consumers.is_empty() {
                return Err(StreamError::config("consumers already bound"));
            }
            let mut bound = Vec::with_capacity(channels.len());
            for name in channels {
                let consumer = self
                    .client
                    .create_consumer(name, subscription)
                    .await
                    .map_err(|e| StreamError::transport(name, e))?;
                bound.push(consumer);
            }

            self.subscription = subscription.to_string();
            for (idx, consumer) in bound.into_iter().enumerate() {
                self.consumers.push(ConsumerChannel {
                    name: channels[idx].clone(),
                    epoch: 0,
                    eof: false,
                    token: CancellationToken::new(),
                    task: None,
                });
                self.start_forwarder(idx, consumer, MessageId::earliest(), true);
            }
            tracing::info!(channels = ?channels, subscription, "consumers bound");
            Ok(())
        })
    }

    fn set_repack_func(&mut self, repack: RepackFunc) {
        if let Some(outbound) = self.outbound.as_mut() {
            outbound.set_repack(repack.clone());
        }
        self.repack = repack;
    }

    fn produce<'a>(&'a self, pack: &'a MsgPack) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.outbound()?.produce(pack).await
        })
    }

    fn broadcast<'a>(&'a self, pack: &'a MsgPack) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.outbound()?.broadcast(pack).await
        })
    }

    fn consume(&mut self) -> BoxFuture<'_, Result<MsgPack, StreamError>> {
        Box::pin(async move {
            let mut msgs = Vec::new();
            while msgs.is_empty() {
                if let (_, Event::Msg(msg)) = self.next_event().await? {
                    msgs.push(msg);
                }
            }
            while let Some((_, event)) = self.try_next_event() {
                if let Event::Msg(msg) = event {
                    msgs.push(msg);
                }
            }
            Ok(batch(msgs))
        })
    }

    /// All or nothing: every named consumer is repositioned, or none is
    /// and nothing already buffered is lost.
    fn seek<'a>(&'a mut self, positions: &'a [Position]) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.ensure_open()?;
            let targets = self.seek_targets(positions)?;

            let mut stopped: Vec<(usize, Stopped)> = Vec::with_capacity(targets.len());
            for &(idx, _) in &targets {
                match self.stop_forwarder(idx).await {
                    Ok(s) => stopped.push((idx, s)),
                    Err(e) => {
                        for (idx, s) in stopped {
                            self.start_forwarder(idx, s.consumer, s.cursor, false);
                        }
                        return Err(e);
                    }
                }
            }

            let mut failure = None;
            for ((_, s), (_, pos)) in stopped.iter_mut().zip(&targets) {
                if let Err(e) = s.consumer.seek(&pos.msg_id).await {
                    failure = Some(StreamError::transport(&pos.channel_name, e));
                    break;
                }
            }

            if let Some(err) = failure {
                // Back to where each forwarder stopped, same epoch.
                for (idx, s) in stopped {
                    let mut consumer = s.consumer;
                    if let Err(e) = consumer.seek(&s.cursor).await {
                        tracing::error!(channel = %self.consumers[idx].name, error = ?e, "rewind after failed seek");
                    }
                    self.start_forwarder(idx, consumer, s.cursor, false);
                }
                tracing::warn!(error = %err, "seek failed, consumers left in place");
                return Err(err);
            }

            for ((idx, s), (_, pos)) in stopped.into_iter().zip(targets) {
                self.start_forwarder(idx, s.consumer, pos.msg_id.clone(), true);
                tracing::info!(channel = %pos.channel_name, msg_id = ?pos.msg_id, timestamp = pos.timestamp, "seek");
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return;
            }
            self.closed = true;
            self.token.cancel();

            if let Some(outbound) = self.outbound.take() {
                outbound.close();
            }
            for ch in &mut self.consumers {
                let Some(task) = ch.task.take() else { continue };
                match task.await {
                    Ok(mut stopped) => stopped.consumer.close(),
                    Err(e) => tracing::warn!(channel = %ch.name, error = ?e, "forwarding task failed"),
                }
            }
            self.merge_rx.close();
            tracing::info!(subscription = %self.subscription, "stream closed");
        })
    }
}
