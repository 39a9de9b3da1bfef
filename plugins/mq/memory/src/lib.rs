use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::Notify;

use msgstream_api::{
    BoxFuture, ConsumerMessage, MessageId, MqClient, MqClientFactory, MqConsumer, MqError,
    MqProducer, Properties,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryMqConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_messages_per_channel() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryMqConfig {
    /// Sends beyond this many stored messages fail with an `Io` error.
    #[serde(default = "default_max_messages_per_channel")]
    pub max_messages_per_channel: usize,
}

impl Default for MemoryMqConfig {
    fn default() -> Self {
        Self {
            max_messages_per_channel: default_max_messages_per_channel(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Channel log
// ═══════════════════════════════════════════════════════════════

struct StoredMessage {
    payload: Vec<u8>,
    properties: Properties,
}

#[derive(Default)]
struct LogState {
    messages: Vec<StoredMessage>,
    /// Next offset to deliver, per subscription.
    cursors: HashMap<String, usize>,
    closed: bool,
}

/// Append-only log of one channel. Offsets are message ids.
struct ChannelLog {
    name: String,
    state: Mutex<LogState>,
    notify: Notify,
}

impl ChannelLog {
    fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new(LogState::default()),
            notify: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(channel = %self.name, "channel log lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn encode_id(offset: usize) -> MessageId {
    MessageId::new((offset as u64).to_be_bytes().to_vec())
}

fn decode_id(id: &MessageId) -> Result<usize, MqError> {
    let bytes: [u8; 8] = id
        .as_bytes()
        .try_into()
        .map_err(|_| MqError::config(format!("malformed message id {id:?}")))?;
    Ok(u64::from_be_bytes(bytes) as usize)
}

// ═══════════════════════════════════════════════════════════════
//  MemoryMq
// ═══════════════════════════════════════════════════════════════

struct Broker {
    channels: RwLock<HashMap<String, Arc<ChannelLog>>>,
    max_messages_per_channel: usize,
}

/// In-process pub/sub backend. Cloning shares the broker, so a producer
/// stream and a consumer stream built from clones see the same channels.
#[derive(Clone)]
pub struct MemoryMq {
    broker: Arc<Broker>,
}

impl Default for MemoryMq {
    fn default() -> Self {
        Self::new(MemoryMqConfig::default())
    }
}

impl MemoryMq {
    pub fn new(config: MemoryMqConfig) -> Self {
        Self {
            broker: Arc::new(Broker {
                channels: RwLock::new(HashMap::new()),
                max_messages_per_channel: config.max_messages_per_channel,
            }),
        }
    }

    fn channel(&self, name: &str) -> Arc<ChannelLog> {
        {
            let guard = match self.broker.channels.read() {
                Ok(g) => g,
                Err(poisoned) => {
                    tracing::warn!("broker read lock was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            if let Some(log) = guard.get(name) {
                return log.clone();
            }
        }
        let mut guard = match self.broker.channels.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("broker write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ChannelLog::new(name.to_string())))
            .clone()
    }

    /// Mark a channel as finished. Consumers drain what is stored, then
    /// see EOF; further sends fail with `Closed`.
    pub fn close_channel(&self, name: &str) {
        let log = self.channel(name);
        log.lock_state().closed = true;
        log.notify.notify_waiters();
        tracing::info!(channel = %name, "channel closed");
    }

    /// Number of messages stored in `name`.
    pub fn channel_len(&self, name: &str) -> usize {
        self.channel(name).lock_state().messages.len()
    }
}

impl MqClient for MemoryMq {
    fn create_producer(&self, channel: &str) -> BoxFuture<'_, Result<Box<dyn MqProducer>, MqError>> {
        let log = self.channel(channel);
        let max_messages = self.broker.max_messages_per_channel;
        Box::pin(async move {
            Ok(Box::new(MemoryProducer {
                log,
                max_messages,
                closed: AtomicBool::new(false),
            }) as Box<dyn MqProducer>)
        })
    }

    fn create_consumer(
        &self,
        channel: &str,
        subscription: &str,
    ) -> BoxFuture<'_, Result<Box<dyn MqConsumer>, MqError>> {
        let log = self.channel(channel);
        let group = subscription.to_string();
        Box::pin(async move {
            if group.is_empty() {
                return Err(MqError::config("subscription name must not be empty"));
            }
            log.lock_state().cursors.entry(group.clone()).or_insert(0);
            Ok(Box::new(MemoryConsumer { log, group, closed: false }) as Box<dyn MqConsumer>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer / Consumer
// ═══════════════════════════════════════════════════════════════

struct MemoryProducer {
    log: Arc<ChannelLog>,
    max_messages: usize,
    closed: AtomicBool,
}

impl MqProducer for MemoryProducer {
    fn channel(&self) -> &str {
        &self.log.name
    }

    fn send(&self, payload: Vec<u8>, properties: Properties) -> BoxFuture<'_, Result<MessageId, MqError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(MqError::closed(format!("producer of '{}' is closed", self.log.name)));
            }
            let offset = {
                let mut state = self.log.lock_state();
                if state.closed {
                    return Err(MqError::closed(format!("channel '{}' is closed", self.log.name)));
                }
                if state.messages.len() >= self.max_messages {
                    return Err(MqError::io(format!(
                        "channel '{}' is full ({} messages)",
                        self.log.name, self.max_messages
                    )));
                }
                state.messages.push(StoredMessage { payload, properties });
                state.messages.len() - 1
            };
            self.log.notify.notify_waiters();
            Ok(encode_id(offset))
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryConsumer {
    log: Arc<ChannelLog>,
    group: String,
    closed: bool,
}

impl MqConsumer for MemoryConsumer {
    fn channel(&self) -> &str {
        &self.log.name
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<ConsumerMessage>> {
        Box::pin(async move {
            loop {
                // Registered before the check so a send in between still wakes us.
                let notified = self.log.notify.notified();
                {
                    if self.closed {
                        return None;
                    }
                    let mut state = self.log.lock_state();
                    let len = state.messages.len();
                    let cursor = state.cursors.entry(self.group.clone()).or_insert(0);
                    if *cursor < len {
                        let offset = *cursor;
                        *cursor += 1;
                        let stored = &state.messages[offset];
                        return Some(ConsumerMessage {
                            channel: self.log.name.clone(),
                            msg_id: encode_id(offset),
                            payload: stored.payload.clone(),
                            properties: stored.properties.clone(),
                        });
                    }
                    if state.closed {
                        return None;
                    }
                }
                notified.await;
            }
        })
    }

    fn seek<'a>(&'a mut self, id: &'a MessageId) -> BoxFuture<'a, Result<(), MqError>> {
        Box::pin(async move {
            if self.closed {
                return Err(MqError::closed(format!("consumer of '{}' is closed", self.log.name)));
            }
            let next = if id.is_earliest() { 0 } else { decode_id(id)? + 1 };
            let mut state = self.log.lock_state();
            if next > state.messages.len() {
                return Err(MqError::config(format!(
                    "message id {id:?} is beyond the end of '{}'",
                    self.log.name
                )));
            }
            state.cursors.insert(self.group.clone(), next);
            tracing::debug!(channel = %self.log.name, group = %self.group, next, "consumer seek");
            Ok(())
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryMqFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryMqFactory;

impl MqClientFactory for MemoryMqFactory {
    fn create(&self, config_json: &str) -> Result<Arc<dyn MqClient>, MqError> {
        let config: MemoryMqConfig = if config_json == "{}" {
            MemoryMqConfig::default()
        } else {
            serde_json::from_str(config_json)?
        };
        Ok(Arc::new(MemoryMq::new(config)))
    }
}
