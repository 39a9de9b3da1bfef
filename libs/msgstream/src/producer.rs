use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use msgstream_api::{MqProducer, MsgCodec, MsgPack, TsMsg};

use crate::StreamError;
use crate::repack::{RepackFunc, bucket_keys};

// ═══════════════════════════════════════════════════════════════
//  MsgProducer: send side of a stream
// ═══════════════════════════════════════════════════════════════

/// Send side of a stream, shared with the stream that created it.
///
/// Cheap to clone and usable while the owning stream is parked in
/// `consume`. Fails with `Closed` once that stream is closed, dropped or
/// cancelled. The repack policy is the one active when the handle was
/// taken.
#[derive(Clone)]
pub struct MsgProducer {
    producers: Arc<Vec<Box<dyn MqProducer>>>,
    codec: Arc<dyn MsgCodec>,
    repack: RepackFunc,
    token: CancellationToken,
}

impl MsgProducer {
    pub(crate) fn new(
        producers: Vec<Box<dyn MqProducer>>,
        codec: Arc<dyn MsgCodec>,
        repack: RepackFunc,
        token: CancellationToken,
    ) -> Self {
        Self {
            producers: Arc::new(producers),
            codec,
            repack,
            token,
        }
    }

    pub fn channels(&self) -> Vec<String> {
        self.producers.iter().map(|p| p.channel().to_string()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn set_repack(&mut self, repack: RepackFunc) {
        self.repack = repack;
    }

    pub(crate) fn close(&self) {
        for producer in self.producers.iter() {
            producer.close();
        }
    }

    /// Route every message through the repack policy and send it.
    /// Destinations are checked before anything is sent; a transport
    /// failure midway leaves earlier messages sent.
    pub async fn produce(&self, pack: &MsgPack) -> Result<(), StreamError> {
        self.check_outgoing(pack)?;
        if pack.is_empty() {
            return Ok(());
        }

        let keys = bucket_keys(&pack.msgs, self.producers.len());
        let routed = (self.repack)(&pack.msgs, &keys)?;
        if let Some(&channel) = routed.keys().find(|&&c| c as usize >= self.producers.len()) {
            return Err(StreamError::config(format!(
                "repack routed to channel {channel}, only {} bound",
                self.producers.len()
            )));
        }

        for (channel, part) in &routed {
            let producer = self.producers[*channel as usize].as_ref();
            for msg in &part.msgs {
                self.send(producer, msg).await?;
            }
        }
        Ok(())
    }

    /// Every message to every channel, bypassing repack.
    pub async fn broadcast(&self, pack: &MsgPack) -> Result<(), StreamError> {
        self.check_outgoing(pack)?;
        for msg in &pack.msgs {
            for producer in self.producers.iter() {
                self.send(producer.as_ref(), msg).await?;
            }
        }
        Ok(())
    }

    fn check_outgoing(&self, pack: &MsgPack) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        if let Some(msg) = pack.msgs.iter().find(|m| m.begin_ts > m.end_ts) {
            return Err(StreamError::config(format!(
                "{} message {}: begin_ts {} > end_ts {}",
                msg.msg_type(),
                msg.id(),
                msg.begin_ts,
                msg.end_ts
            )));
        }
        Ok(())
    }

    async fn send(&self, producer: &dyn MqProducer, msg: &TsMsg) -> Result<(), StreamError> {
        let (payload, properties) = self.codec.marshal(msg).map_err(StreamError::Codec)?;
        producer
            .send(payload, properties)
            .await
            .map_err(|e| StreamError::transport(producer.channel(), e))?;
        Ok(())
    }
}
