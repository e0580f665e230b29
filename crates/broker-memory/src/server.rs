use crate::Error;
use crate::consumer::MemoryAcker;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::Bytes;
use courier_broker::{
    AckPolicy, ConsumerSpec, DeliverPolicy, Delivery, DeliveryInfo, Headers, StoredMessage,
    StreamInfo, StreamSpec, subject,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

static SERVERS: LazyLock<Mutex<HashMap<String, Arc<ServerState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// An in-process broker reachable by address from [`crate::MemoryBroker::connect`].
///
/// State lives as long as the server is running, independently of client
/// connections, so durable consumers survive a reconnect.
#[derive(Clone, Debug)]
pub struct MemoryServer {
    address: String,
    state: Arc<ServerState>,
}

impl MemoryServer {
    /// Starts a server at `address`, or returns the one already running there.
    pub fn start<A>(address: A) -> Self
    where
        A: Into<String>,
    {
        let address = address.into();
        let state = SERVERS
            .lock()
            .entry(address.clone())
            .or_insert_with(|| {
                info!(%address, "memory server started");
                Arc::new(ServerState::default())
            })
            .clone();

        Self { address, state }
    }

    /// Stops accepting new connections at this address.
    pub fn stop(&self) {
        if SERVERS.lock().remove(&self.address).is_some() {
            info!(address = %self.address, "memory server stopped");
        }
    }

    /// The address clients connect to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of messages delivered to `durable` but not yet acknowledged.
    #[must_use]
    pub fn ack_pending(&self, stream: &str, durable: &str) -> Option<usize> {
        let streams = self.state.streams.lock();

        streams
            .get(stream)
            .and_then(|s| s.consumers.get(durable))
            .map(|c| c.pending.len())
    }

    pub(crate) fn lookup(address: &str) -> Option<Arc<ServerState>> {
        SERVERS.lock().get(address).cloned()
    }
}

#[derive(Debug)]
pub struct ServerState {
    streams: Mutex<HashMap<String, StreamState>>,
    activity: watch::Sender<u64>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            activity: watch::Sender::new(0),
        }
    }
}

#[derive(Debug)]
struct StreamState {
    spec: StreamSpec,
    messages: BTreeMap<u64, StoredMessage>,
    last_sequence: u64,
    consumers: HashMap<String, ConsumerState>,
}

impl StreamState {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            name: self.spec.name().to_string(),
            subjects: self.spec.subjects().to_vec(),
            messages: self.messages.len() as u64,
            last_sequence: self.last_sequence,
        }
    }

    fn captures(&self, subject: &str) -> bool {
        self.spec
            .subjects()
            .iter()
            .any(|filter| subject::matches(filter, subject))
    }
}

#[derive(Debug)]
struct ConsumerState {
    spec: ConsumerSpec,
    cursor: u64,
    consumer_sequence: u64,
    pending: BTreeMap<u64, Pending>,
}

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    delivered: u64,
}

/// A batch handed out by [`ServerState::take_batch`], plus the earliest moment
/// an unacknowledged message becomes due for redelivery.
pub struct Batch {
    pub deliveries: Vec<Delivery>,
    pub next_redelivery: Option<Instant>,
}

impl ServerState {
    pub fn subscribe_activity(&self) -> watch::Receiver<u64> {
        self.activity.subscribe()
    }

    pub fn notify_activity(&self) {
        self.activity.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub fn publish(&self, subject: &str, payload: Bytes, headers: Headers) -> Result<u64, Error> {
        if !subject::is_valid_subject(subject) {
            return Err(Error::InvalidSubject(subject.to_string()));
        }

        let sequence = {
            let mut streams = self.streams.lock();
            let stream = streams
                .values_mut()
                .find(|s| s.captures(subject))
                .ok_or_else(|| Error::NoStream(subject.to_string()))?;

            stream.last_sequence += 1;
            let sequence = stream.last_sequence;
            stream.messages.insert(
                sequence,
                StoredMessage {
                    subject: subject.to_string(),
                    sequence,
                    payload,
                    headers,
                },
            );

            if let Some(history) = stream.spec.max_messages_per_subject() {
                let history = usize::try_from(history.max(1)).unwrap_or(usize::MAX);
                let same_subject: Vec<u64> = stream
                    .messages
                    .values()
                    .filter(|m| m.subject == subject)
                    .map(|m| m.sequence)
                    .collect();

                if same_subject.len() > history {
                    for old in &same_subject[..same_subject.len() - history] {
                        stream.messages.remove(old);
                    }
                }
            }

            sequence
        };

        self.notify_activity();

        Ok(sequence)
    }

    pub fn stream_info(&self, name: &str) -> Option<StreamInfo> {
        self.streams.lock().get(name).map(StreamState::info)
    }

    pub fn add_stream(&self, spec: &StreamSpec) -> Result<StreamInfo, Error> {
        spec.validate()?;

        let mut streams = self.streams.lock();

        if streams.contains_key(spec.name()) {
            return Err(Error::StreamExists(spec.name().to_string()));
        }

        if let Some(existing) = streams.values().find(|s| {
            spec.subjects().iter().any(|new| {
                s.spec
                    .subjects()
                    .iter()
                    .any(|old| subject::matches(old, new) || subject::matches(new, old))
            })
        }) {
            return Err(Error::SubjectsOverlap {
                stream: spec.name().to_string(),
                existing: existing.spec.name().to_string(),
            });
        }

        let stream = StreamState {
            spec: spec.clone(),
            messages: BTreeMap::new(),
            last_sequence: 0,
            consumers: HashMap::new(),
        };
        let info = stream.info();
        streams.insert(spec.name().to_string(), stream);

        debug!(stream = %spec.name(), subjects = ?spec.subjects(), "stream added");

        Ok(info)
    }

    pub fn last_message(&self, stream: &str, subject: &str) -> Result<Option<StoredMessage>, Error> {
        let streams = self.streams.lock();
        let stream = streams
            .get(stream)
            .ok_or_else(|| Error::StreamNotFound(stream.to_string()))?;

        Ok(stream
            .messages
            .values()
            .rev()
            .find(|m| m.subject == subject)
            .cloned())
    }

    /// Creates the durable consumer if needed and returns the stream it lives on.
    pub fn bind_consumer(&self, spec: &ConsumerSpec) -> Result<String, Error> {
        spec.validate()?;

        let mut streams = self.streams.lock();
        let stream = streams
            .values_mut()
            .find(|s| s.captures(spec.subject()))
            .ok_or_else(|| Error::NoStream(spec.subject().to_string()))?;

        let start = match spec.deliver_policy() {
            DeliverPolicy::All => 1,
            DeliverPolicy::New => stream.last_sequence + 1,
        };

        if stream.consumers.contains_key(spec.durable_name()) {
            debug!(durable = %spec.durable_name(), "resuming durable consumer");
        } else {
            stream.consumers.insert(
                spec.durable_name().to_string(),
                ConsumerState {
                    spec: spec.clone(),
                    cursor: start,
                    consumer_sequence: 0,
                    pending: BTreeMap::new(),
                },
            );
            debug!(durable = %spec.durable_name(), cursor = start, "durable consumer created");
        }

        Ok(stream.spec.name().to_string())
    }

    /// Hands out due redeliveries first, then new messages, up to `max`.
    pub fn take_batch(
        self: &Arc<Self>,
        stream_name: &str,
        durable: &str,
        max: usize,
    ) -> Result<Batch, Error> {
        let now = Instant::now();
        let mut streams = self.streams.lock();
        let stream = streams
            .get_mut(stream_name)
            .ok_or_else(|| Error::StreamNotFound(stream_name.to_string()))?;
        let consumer =
            stream
                .consumers
                .get_mut(durable)
                .ok_or_else(|| Error::ConsumerNotFound {
                    stream: stream_name.to_string(),
                    durable: durable.to_string(),
                })?;

        let ack_wait = consumer.spec.ack_wait();
        let max_deliver = consumer
            .spec
            .max_deliver()
            .and_then(|m| u64::try_from(m).ok());
        let mut picked: Vec<(u64, u64)> = Vec::new();

        let due: Vec<u64> = consumer
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in due {
            if picked.len() >= max {
                break;
            }

            let exhausted = consumer
                .pending
                .get(&seq)
                .is_some_and(|p| max_deliver.is_some_and(|m| p.delivered >= m));

            if exhausted || !stream.messages.contains_key(&seq) {
                consumer.pending.remove(&seq);
                continue;
            }

            if let Some(pending) = consumer.pending.get_mut(&seq) {
                pending.delivered += 1;
                pending.deadline = now + ack_wait;
                picked.push((seq, pending.delivered));
            }
        }

        let mut next_cursor = consumer.cursor;
        for (seq, message) in stream.messages.range(consumer.cursor..) {
            if picked.len() >= max {
                break;
            }

            next_cursor = seq + 1;

            if !subject::matches(consumer.spec.subject(), &message.subject) {
                continue;
            }

            if consumer.spec.ack_policy() == AckPolicy::Explicit {
                consumer.pending.insert(
                    *seq,
                    Pending {
                        deadline: now + ack_wait,
                        delivered: 1,
                    },
                );
            }
            picked.push((*seq, 1));
        }
        consumer.cursor = next_cursor.max(consumer.cursor);

        let remaining = stream.last_sequence.saturating_sub(consumer.cursor - 1);
        let mut deliveries = Vec::with_capacity(picked.len());
        for (seq, delivered) in picked {
            let Some(message) = stream.messages.get(&seq) else {
                continue;
            };

            consumer.consumer_sequence += 1;
            deliveries.push(Delivery::new(
                message.subject.clone(),
                message.payload.clone(),
                message.headers.clone(),
                DeliveryInfo {
                    stream_sequence: seq,
                    consumer_sequence: consumer.consumer_sequence,
                    delivered,
                    pending: remaining,
                },
                Box::new(MemoryAcker::new(
                    self.clone(),
                    stream_name.to_string(),
                    durable.to_string(),
                    seq,
                )),
            ));
        }

        let next_redelivery = consumer.pending.values().map(|p| p.deadline).min();

        Ok(Batch {
            deliveries,
            next_redelivery,
        })
    }

    pub fn ack(&self, stream: &str, durable: &str, sequence: u64) {
        let mut streams = self.streams.lock();

        if let Some(consumer) = streams
            .get_mut(stream)
            .and_then(|s| s.consumers.get_mut(durable))
        {
            consumer.pending.remove(&sequence);
        }
    }

    pub fn nak(&self, stream: &str, durable: &str, sequence: u64, delay: Option<Duration>) {
        {
            let mut streams = self.streams.lock();

            if let Some(pending) = streams
                .get_mut(stream)
                .and_then(|s| s.consumers.get_mut(durable))
                .and_then(|c| c.pending.get_mut(&sequence))
            {
                pending.deadline = Instant::now() + delay.unwrap_or_default();
            }
        }

        self.notify_activity();
    }
}
