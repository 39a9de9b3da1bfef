//! Multiplexed message streams over an MQ backend.
//!
//! `MqMsgStream` produces and consumes typed messages on a set of channels
//! with per-channel FIFO and no cross-channel order. `MqTtMsgStream` wraps
//! it and turns the merged input into time-bounded, globally ordered packs
//! using broadcast time ticks as watermarks.

pub mod codec;
pub mod config;
pub mod error;
mod forward;
pub mod producer;
pub mod repack;
pub mod stream;
pub mod tt_stream;

pub use codec::UnmarshalDispatcher;
pub use config::StreamConfig;
pub use error::StreamError;
pub use producer::MsgProducer;
pub use repack::{RepackFunc, default_repack, delete_repack, insert_repack};
pub use stream::MqMsgStream;
pub use tt_stream::MqTtMsgStream;

use msgstream_api::{BoxFuture, MsgPack, Position};

// ═══════════════════════════════════════════════════════════════
//  MsgStream: stream API shared by both stream kinds
// ═══════════════════════════════════════════════════════════════

pub trait MsgStream: Send {
    /// Bind one producer per channel. Channel index = position in `channels`.
    fn as_producer<'a>(&'a mut self, channels: &'a [String]) -> BoxFuture<'a, Result<(), StreamError>>;

    /// Bind one consumer per channel under a shared subscription and start
    /// forwarding.
    fn as_consumer<'a>(
        &'a mut self,
        channels: &'a [String],
        subscription: &'a str,
    ) -> BoxFuture<'a, Result<(), StreamError>>;

    fn set_repack_func(&mut self, repack: RepackFunc);

    /// Route every message through the repack policy and send it.
    /// Returns the first error; messages already sent stay sent. To send
    /// while `consume` is pending, take a `MsgProducer` from the stream.
    fn produce<'a>(&'a self, pack: &'a MsgPack) -> BoxFuture<'a, Result<(), StreamError>>;

    /// Send every message to every bound producer channel.
    fn broadcast<'a>(&'a self, pack: &'a MsgPack) -> BoxFuture<'a, Result<(), StreamError>>;

    /// Wait for the next pack.
    fn consume(&mut self) -> BoxFuture<'_, Result<MsgPack, StreamError>>;

    /// Resume each named channel right after its position. Either every
    /// channel is repositioned or, on error, none is.
    fn seek<'a>(&'a mut self, positions: &'a [Position]) -> BoxFuture<'a, Result<(), StreamError>>;

    /// Bind consumers for the channels named in `positions` under the
    /// subscription they were recorded with, then seek to them.
    fn resume_from<'a>(&'a mut self, positions: &'a [Position]) -> BoxFuture<'a, Result<(), StreamError>> {
        Box::pin(async move {
            let Some(first) = positions.first() else {
                return Err(StreamError::config("resume_from needs at least one position"));
            };
            if let Some(other) = positions.iter().find(|p| p.msg_group != first.msg_group) {
                return Err(StreamError::config(format!(
                    "positions recorded under different subscriptions: '{}' and '{}'",
                    first.msg_group, other.msg_group
                )));
            }
            let channels: Vec<String> = positions.iter().map(|p| p.channel_name.clone()).collect();
            self.as_consumer(&channels, &first.msg_group).await?;
            self.seek(positions).await
        })
    }

    /// Release producers and consumers and stop forwarding. Idempotent.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}
