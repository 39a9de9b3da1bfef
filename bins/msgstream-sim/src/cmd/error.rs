use msgstream::StreamError;
use msgstream_api::MqError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Stream(#[from] StreamError),

    #[error("mq: {0}")]
    Mq(#[from] MqError),

    /// A consumed pack broke an ordering or delivery guarantee.
    #[error("check failed: {0}")]
    Check(String),

    #[error("producer task: {0}")]
    Producer(#[from] tokio::task::JoinError),
}
