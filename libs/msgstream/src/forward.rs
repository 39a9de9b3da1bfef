use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use msgstream_api::{MessageId, MqConsumer, MsgCodec, Position, TsMsg};

// ═══════════════════════════════════════════════════════════════
//  Forwarding task: consumer.recv() → unmarshal → merge buffer
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub(crate) enum Event {
    Msg(TsMsg),
    /// The channel was closed on the backend; nothing more will arrive.
    Eof,
}

/// One item in the shared merge buffer.
///
/// `epoch` is bumped on every seek of the channel, so items read before
/// the seek can be told apart and discarded.
#[derive(Debug)]
pub(crate) struct Forwarded {
    pub channel: usize,
    pub epoch: u64,
    pub event: Event,
}

/// What a stopped forwarding task hands back.
pub(crate) struct Stopped {
    pub consumer: Box<dyn MqConsumer>,
    /// Last message id that reached the merge buffer (or was dropped as
    /// undecodable). Seeking the consumer here resumes without loss even
    /// if it had already read further.
    pub cursor: MessageId,
}

/// Start the forwarding task of one consumer channel.
///
/// Decodes every inbound payload, stamps its position and pushes it into
/// the merge buffer, preserving channel order. Undecodable payloads are
/// dropped. The task ends on cancellation, on EOF (after forwarding it) or
/// when the stream is gone, and hands the consumer back so it can be
/// repositioned or closed. `cursor` is where the consumer was last
/// positioned.
pub(crate) fn spawn_forwarder(
    channel: usize,
    epoch: u64,
    mut consumer: Box<dyn MqConsumer>,
    mut cursor: MessageId,
    subscription: String,
    codec: Arc<dyn MsgCodec>,
    tx: mpsc::Sender<Forwarded>,
    token: CancellationToken,
) -> JoinHandle<Stopped> {
    tokio::spawn(async move {
        let name = consumer.channel().to_string();
        loop {
            let received = tokio::select! {
                raw = consumer.recv() => raw,
                _ = token.cancelled() => break,
            };

            let (event, read) = match received {
                Some(raw) => match codec.unmarshal(&raw.payload, &raw.properties) {
                    Ok(mut msg) => {
                        msg.position = Some(Position::new(&name, raw.msg_id.clone(), &subscription, msg.end_ts));
                        (Event::Msg(msg), Some(raw.msg_id))
                    }
                    Err(e) => {
                        tracing::warn!(channel = %name, msg_id = ?raw.msg_id, error = ?e, "dropping undecodable payload");
                        cursor = raw.msg_id;
                        continue;
                    }
                },
                None => (Event::Eof, None),
            };

            let eof = matches!(event, Event::Eof);
            tokio::select! {
                sent = tx.send(Forwarded { channel, epoch, event }) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = token.cancelled() => break,
            }
            if let Some(id) = read {
                cursor = id;
            }
            if eof {
                tracing::info!(channel = %name, "channel reached EOF");
                break;
            }
        }
        tracing::debug!(channel = %name, epoch, cursor = ?cursor, "forwarder stopped");
        Stopped { consumer, cursor }
    })
}
