use crate::{Position, Timestamp, TsMsg};

/// Batch of messages handed to or returned from a stream.
///
/// Outgoing packs only need `msgs`. Packs returned by `consume` also carry
/// the time bounds and, per channel, the cursor before (`start_positions`)
/// and after (`end_positions`) the batch. Seeking to `end_positions`
/// resumes right after this pack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsgPack {
    pub begin_ts: Timestamp,
    pub end_ts: Timestamp,
    pub msgs: Vec<TsMsg>,
    pub start_positions: Vec<Position>,
    pub end_positions: Vec<Position>,
}

impl MsgPack {
    pub fn new(msgs: Vec<TsMsg>) -> Self {
        Self { msgs, ..Default::default() }
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn push(&mut self, msg: TsMsg) {
        self.msgs.push(msg);
    }

    /// End position recorded for `channel`, if the pack has one.
    pub fn end_position(&self, channel: &str) -> Option<&Position> {
        self.end_positions.iter().find(|p| p.channel_name == channel)
    }
}

impl From<Vec<TsMsg>> for MsgPack {
    fn from(msgs: Vec<TsMsg>) -> Self {
        Self::new(msgs)
    }
}
