use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use msgstream_api::{BoxFuture, MessageId, MqClient, MsgCodec, MsgPack, Position, Timestamp, TsMsg};

use crate::forward::Event;
use crate::{MqMsgStream, MsgProducer, MsgStream, RepackFunc, StreamConfig, StreamError};

// ═══════════════════════════════════════════════════════════════
//  TickSync: barrier state machine
// ═══════════════════════════════════════════════════════════════

struct Buffered {
    msg: TsMsg,
    /// Cursor of the message read right before this one on its channel.
    resume_from: MessageId,
}

struct ChannelState {
    name: String,
    buffer: VecDeque<Buffered>,
    tick: Timestamp,
    /// Tick the channel was last sought to; ticks at or below it are replays.
    seek_tick: Timestamp,
    eof: bool,
    last_id: MessageId,
}

pub(crate) enum Cut {
    /// Not every channel has passed the previous tick yet.
    Pending,
    Pack(MsgPack),
    /// Every channel reached EOF and everything was flushed.
    Finished,
}

/// Per-channel buffers and ticks of a time-tick stream.
///
/// Fed one event at a time. A pack can be cut once the smallest tick over
/// all live channels exceeds the previous cut; it holds exactly the
/// buffered data with `prev < begin_ts <= new_tick`.
pub(crate) struct TickSync {
    channels: Vec<ChannelState>,
    group: String,
    prev_tick: Timestamp,
    prev_end_positions: Vec<Position>,
    finished: bool,
}

impl TickSync {
    pub(crate) fn new(channels: &[String], group: &str) -> Self {
        Self {
            channels: channels
                .iter()
                .map(|name| ChannelState {
                    name: name.clone(),
                    buffer: VecDeque::new(),
                    tick: 0,
                    seek_tick: 0,
                    eof: false,
                    last_id: MessageId::earliest(),
                })
                .collect(),
            group: group.to_string(),
            prev_tick: 0,
            prev_end_positions: channels
                .iter()
                .map(|name| Position::new(name, MessageId::earliest(), group, 0))
                .collect(),
            finished: false,
        }
    }

    pub(crate) fn observe(&mut self, channel: usize, event: Event) {
        let Some(state) = self.channels.get_mut(channel) else {
            return;
        };
        let msg = match event {
            Event::Msg(msg) => msg,
            Event::Eof => {
                state.eof = true;
                return;
            }
        };

        let resume_from = state.last_id.clone();
        if let Some(pos) = msg.position() {
            state.last_id = pos.msg_id.clone();
        }

        if msg.is_time_tick() {
            if msg.end_ts < state.tick && msg.end_ts > state.seek_tick {
                tracing::warn!(channel = %state.name, tick = msg.end_ts, last = state.tick, "time tick went backwards");
            }
            state.tick = state.tick.max(msg.end_ts);
        } else if msg.begin_ts <= self.prev_tick {
            tracing::warn!(
                channel = %state.name,
                msg_id = msg.id(),
                begin_ts = msg.begin_ts,
                tick = self.prev_tick,
                "dropping message at or below the synchronized tick"
            );
        } else {
            state.buffer.push_back(Buffered { msg, resume_from });
        }
    }

    /// Smallest tick over channels that have not reached EOF. `None` when
    /// all of them have.
    fn barrier(&self) -> Option<Timestamp> {
        self.channels.iter().filter(|c| !c.eof).map(|c| c.tick).min()
    }

    pub(crate) fn try_cut(&mut self) -> Cut {
        if self.finished {
            return Cut::Finished;
        }
        let (new_tick, flush) = match self.barrier() {
            Some(tick) if tick > self.prev_tick => (tick, false),
            Some(_) => return Cut::Pending,
            None => {
                let Some(last) = self.channels.iter().flat_map(|c| c.buffer.iter()).map(|b| b.msg.begin_ts).max()
                else {
                    self.finished = true;
                    return Cut::Finished;
                };
                (last.max(self.prev_tick), true)
            }
        };

        let mut msgs = Vec::new();
        let mut end_positions = Vec::with_capacity(self.channels.len());
        for state in &mut self.channels {
            let mut kept = VecDeque::with_capacity(state.buffer.len());
            for item in state.buffer.drain(..) {
                if item.msg.begin_ts <= new_tick {
                    msgs.push(item.msg);
                } else {
                    kept.push_back(item);
                }
            }
            state.buffer = kept;

            let resume = match state.buffer.front() {
                Some(first) => first.resume_from.clone(),
                None => state.last_id.clone(),
            };
            end_positions.push(Position::new(&state.name, resume, &self.group, new_tick));
        }
        msgs.sort_by_key(TsMsg::begin_ts);

        let pack = MsgPack {
            begin_ts: self.prev_tick,
            end_ts: new_tick,
            msgs,
            start_positions: std::mem::replace(&mut self.prev_end_positions, end_positions.clone()),
            end_positions,
        };
        self.prev_tick = new_tick;
        if flush {
            self.finished = true;
        }
        Cut::Pack(pack)
    }

    /// Restart from recorded positions. Channels not named keep their state
    /// minus anything already covered by the new tick.
    pub(crate) fn seek(&mut self, positions: &[Position]) {
        let Some(tick) = positions.iter().map(|p| p.timestamp).min() else {
            return;
        };
        self.prev_tick = tick;
        self.finished = false;

        for pos in positions {
            let Some(idx) = self.channels.iter().position(|c| c.name == pos.channel_name) else {
                continue;
            };
            let state = &mut self.channels[idx];
            state.buffer.clear();
            state.tick = pos.timestamp;
            state.seek_tick = pos.timestamp;
            state.eof = false;
            state.last_id = pos.msg_id.clone();
            self.prev_end_positions[idx] = pos.clone();
        }
        for state in &mut self.channels {
            state.buffer.retain(|b| b.msg.begin_ts > tick);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MqTtMsgStream
// ═══════════════════════════════════════════════════════════════

/// Time-tick synchronized stream.
///
/// Produces like `MqMsgStream`. `consume` returns packs bounded by
/// consecutive synchronized ticks; time ticks themselves are never
/// delivered as data.
pub struct MqTtMsgStream {
    inner: MqMsgStream,
    sync: Option<TickSync>,
}

impl MqTtMsgStream {
    pub fn new(
        client: Arc<dyn MqClient>,
        codec: Arc<dyn MsgCodec>,
        config: StreamConfig,
        token: &CancellationToken,
    ) -> Self {
        Self {
            inner: MqMsgStream::new(client, codec, config, token),
            sync: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Handle on the send side, usable concurrently with `consume`.
    pub fn producer(&self) -> Result<MsgProducer, StreamError> {
        self.inner.producer()
    }
}

impl MsgStream for MqTtMsgStream {
    fn as_producer<'a>(&'a mut self, channels: &'a [String]) -> BoxFuture<'a, Result<(), StreamError>> {
        self.inner.as_producer(channels)
    }

    fn as_consumer<'a>(
        &'a mut self,
        channels: &'a [String],
        subscription: &'a str,
    ) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.inner.as_consumer(channels, subscription).await?;
            self.sync = Some(TickSync::new(channels, subscription));
            Ok(())
        })
    }

    fn set_repack_func(&mut self, repack: RepackFunc) {
        self.inner.set_repack_func(repack);
    }

    fn produce<'a>(&'a self, pack: &'a MsgPack) -> BoxFuture<'a, Result<(), StreamError>> {
        self.inner.produce(pack)
    }

    fn broadcast<'a>(&'a self, pack: &'a MsgPack) -> BoxFuture<'a, Result<(), StreamError>> {
        self.inner.broadcast(pack)
    }

    fn consume(&mut self) -> BoxFuture<'_, Result<MsgPack, StreamError>> {
        Box::pin(async move {
            self.inner.ensure_open()?;
            let Some(sync) = self.sync.as_mut() else {
                return Err(StreamError::config("consume before as_consumer"));
            };
            loop {
                match sync.try_cut() {
                    Cut::Pack(pack) => {
                        tracing::debug!(begin_ts = pack.begin_ts, end_ts = pack.end_ts, msgs = pack.len(), "tt pack");
                        return Ok(pack);
                    }
                    Cut::Finished => return Err(StreamError::Closed),
                    Cut::Pending => {}
                }
                let (channel, event) = self.inner.next_event().await?;
                sync.observe(channel, event);
            }
        })
    }

    fn seek<'a>(&'a mut self, positions: &'a [Position]) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            self.inner.seek(positions).await?;
            if let Some(sync) = self.sync.as_mut() {
                sync.seek(positions);
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.inner.close()
    }
}
