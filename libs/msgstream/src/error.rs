use msgstream_api::MqError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Send, receive or seek failed on a backend channel. Not retried.
    #[error("transport ({channel}): {source}")]
    Transport { channel: String, source: MqError },

    /// Outgoing message could not be marshaled.
    #[error("codec: {0}")]
    Codec(MqError),

    #[error("config: {0}")]
    Config(String),

    #[error("stream closed")]
    Closed,
}

impl StreamError {
    pub(crate) fn transport(channel: impl Into<String>, source: MqError) -> Self {
        StreamError::Transport { channel: channel.into(), source }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        StreamError::Config(msg.into())
    }
}
