use serde::Deserialize;

use crate::StreamError;

// ═══════════════════════════════════════════════════════════════
//  Stream Config
// ═══════════════════════════════════════════════════════════════

/// Tunables shared by `MqMsgStream` and `MqTtMsgStream`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the merge buffer between forwarding tasks and `consume`.
    /// A full buffer stops the forwarders from pulling off the transport.
    #[serde(default = "default_receive_buffer")]
    pub receive_buffer: usize,
}

fn default_receive_buffer() -> usize {
    1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            receive_buffer: default_receive_buffer(),
        }
    }
}

impl StreamConfig {
    pub fn from_toml(content: &str) -> Result<Self, StreamError> {
        let config: StreamConfig =
            toml::from_str(content).map_err(|e| StreamError::config(format!("bad stream config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &str) -> Result<Self, StreamError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StreamError::config(format!("cannot read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.receive_buffer == 0 {
            return Err(StreamError::config("receive_buffer must be > 0"));
        }
        Ok(())
    }
}
