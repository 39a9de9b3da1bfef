use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{MessageId, MqError, Properties, TsMsg};

/// Boxed `Send` future returned by the contract traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  MQ Client contract
// ════════════════════════════════════════════════════════════════

/// Message as delivered by a backend consumer.
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub channel: String,
    pub msg_id: MessageId,
    pub payload: Vec<u8>,
    pub properties: Properties,
}

/// Factory for creating an MQ client from a JSON config.
///
/// Lets binaries resolve a backend by name the same way for every
/// implementation.
pub trait MqClientFactory: Send + Sync {
    fn create(&self, config_json: &str) -> Result<Arc<dyn MqClient>, MqError>;
}

/// Pub/sub backend. Hands out one producer or consumer per channel.
///
/// Implementations guarantee strict FIFO per channel, at-least-once
/// delivery and a stable, seekable `MessageId` on every delivered message.
pub trait MqClient: Send + Sync {
    fn create_producer(&self, channel: &str) -> BoxFuture<'_, Result<Box<dyn MqProducer>, MqError>>;

    /// Consumers created with the same `subscription` on one channel share
    /// its backlog: each message goes to exactly one of them.
    /// A new subscription starts at the beginning of the channel.
    fn create_consumer(
        &self,
        channel: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<Box<dyn MqConsumer>, MqError>>;
}

pub trait MqProducer: Send + Sync {
    fn channel(&self) -> &str;

    /// Append one message to the channel. Returns the id it was stored at.
    fn send(&self, payload: Vec<u8>, properties: Properties) -> BoxFuture<'_, Result<MessageId, MqError>>;

    fn close(&self);
}

pub trait MqConsumer: Send {
    fn channel(&self) -> &str;

    /// Next message in channel order. `None` = channel closed (EOF) or
    /// consumer closed.
    ///
    /// Must be cancel-safe: dropping the future before it resolves does not
    /// lose a message.
    fn recv(&mut self) -> BoxFuture<'_, Option<ConsumerMessage>>;

    /// Reposition so the next `recv` returns the message right after `id`
    /// (`MessageId::earliest()` rewinds to the start of the channel).
    fn seek<'a>(&'a mut self, id: &'a MessageId) -> BoxFuture<'a, Result<(), MqError>>;

    fn close(&mut self);
}

// ════════════════════════════════════════════════════════════════
//  Codec contract
// ════════════════════════════════════════════════════════════════

/// Marshal/unmarshal between typed messages and payload + properties.
///
/// `unmarshal(marshal(m))` reproduces every field of `m` except its
/// position.
pub trait MsgCodec: Send + Sync {
    fn marshal(&self, msg: &TsMsg) -> Result<(Vec<u8>, Properties), MqError>;

    fn unmarshal(&self, payload: &[u8], properties: &Properties) -> Result<TsMsg, MqError>;
}
