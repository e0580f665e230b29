use crate::error::SpecError;
use crate::subject;

use std::time::Duration;

/// Where a stream keeps its messages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StorageKind {
    /// Persisted to disk.
    #[default]
    File,

    /// Kept in broker memory only.
    Memory,
}

/// Declaration of a durable, ordered log over one or more subjects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamSpec {
    name: String,
    subjects: Vec<String>,
    storage: StorageKind,
    max_messages_per_subject: Option<i64>,
}

impl StreamSpec {
    /// Creates a file-backed stream spec with unlimited per-subject history.
    pub fn new<N, I, S>(name: N, subjects: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            storage: StorageKind::default(),
            max_messages_per_subject: None,
        }
    }

    /// Sets the storage kind.
    #[must_use]
    pub const fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Keeps at most `history` messages per subject (oldest are discarded).
    #[must_use]
    pub const fn with_max_messages_per_subject(mut self, history: i64) -> Self {
        self.max_messages_per_subject = Some(history);
        self
    }

    /// The stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The subjects captured by the stream, in declaration order.
    #[must_use]
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// The storage kind.
    #[must_use]
    pub const fn storage(&self) -> StorageKind {
        self.storage
    }

    /// Per-subject history limit, if any.
    #[must_use]
    pub const fn max_messages_per_subject(&self) -> Option<i64> {
        self.max_messages_per_subject
    }

    /// Checks the spec against the broker's naming rules.
    ///
    /// # Errors
    ///
    /// Returns a [`SpecError`] describing the first violation found.
    pub fn validate(&self) -> Result<(), SpecError> {
        validate_name("stream", &self.name)?;

        if self.subjects.is_empty() {
            return Err(SpecError::NoSubjects(self.name.clone()));
        }

        if let Some(bad) = self
            .subjects
            .iter()
            .find(|s| !subject::is_valid_filter(s))
        {
            return Err(SpecError::InvalidSubject(bad.clone()));
        }

        Ok(())
    }
}

/// Acknowledgement policy of a consumer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AckPolicy {
    /// Every message must be acknowledged individually; unacknowledged
    /// messages are redelivered once `ack_wait` elapses.
    #[default]
    Explicit,

    /// Messages count as acknowledged as soon as they are delivered.
    None,
}

/// Where a new durable consumer starts reading.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeliverPolicy {
    /// From the first message still held by the stream.
    #[default]
    All,

    /// Only messages published after the consumer is created.
    New,
}

/// Declaration of a durable consumer over a filtered view of a stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsumerSpec {
    subject: String,
    durable_name: String,
    ack_policy: AckPolicy,
    deliver_policy: DeliverPolicy,
    ack_wait: Duration,
    max_deliver: Option<i64>,
}

impl ConsumerSpec {
    /// Default time the broker waits for an acknowledgement before redelivering.
    pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

    /// Creates an explicit-ack consumer that replays the whole stream.
    pub fn new<J, N>(subject: J, durable_name: N) -> Self
    where
        J: Into<String>,
        N: Into<String>,
    {
        Self {
            subject: subject.into(),
            durable_name: durable_name.into(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            ack_wait: Self::DEFAULT_ACK_WAIT,
            max_deliver: None,
        }
    }

    /// Sets the acknowledgement policy.
    #[must_use]
    pub const fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    /// Sets the deliver policy.
    #[must_use]
    pub const fn with_deliver_policy(mut self, deliver_policy: DeliverPolicy) -> Self {
        self.deliver_policy = deliver_policy;
        self
    }

    /// Sets how long the broker waits for an acknowledgement.
    #[must_use]
    pub const fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Caps the number of delivery attempts per message.
    #[must_use]
    pub const fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = Some(max_deliver);
        self
    }

    /// The filter subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The durable name identifying the consumer group.
    #[must_use]
    pub fn durable_name(&self) -> &str {
        &self.durable_name
    }

    /// The acknowledgement policy.
    #[must_use]
    pub const fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    /// The deliver policy.
    #[must_use]
    pub const fn deliver_policy(&self) -> DeliverPolicy {
        self.deliver_policy
    }

    /// The acknowledgement deadline.
    #[must_use]
    pub const fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    /// The delivery cap, if any.
    #[must_use]
    pub const fn max_deliver(&self) -> Option<i64> {
        self.max_deliver
    }

    /// Checks the spec against the broker's naming rules.
    ///
    /// # Errors
    ///
    /// Returns a [`SpecError`] describing the first violation found.
    pub fn validate(&self) -> Result<(), SpecError> {
        validate_name("durable consumer", &self.durable_name)?;

        if !subject::is_valid_filter(&self.subject) {
            return Err(SpecError::InvalidSubject(self.subject.clone()));
        }

        if self.ack_wait.is_zero() {
            return Err(SpecError::ZeroAckWait);
        }

        Ok(())
    }
}

/// What the broker reports about an existing stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    /// Stream name.
    pub name: String,

    /// Subjects the stream captures.
    pub subjects: Vec<String>,

    /// Number of messages currently held.
    pub messages: u64,

    /// Sequence of the newest message (0 when empty).
    pub last_sequence: u64,
}

fn validate_name(what: &'static str, name: &str) -> Result<(), SpecError> {
    let invalid = name.is_empty()
        || name
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());

    if invalid {
        return Err(SpecError::InvalidName {
            what,
            name: name.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_consumer_defaults() {
        let spec = ConsumerSpec::new("orders", "orders_worker");

        assert_eq!(spec.ack_policy(), AckPolicy::Explicit);
        assert_eq!(spec.deliver_policy(), DeliverPolicy::All);
        assert_eq!(spec.ack_wait(), ConsumerSpec::DEFAULT_ACK_WAIT);
        assert_eq!(spec.max_deliver(), None);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_durable_names_are_checked() {
        assert_matches!(
            ConsumerSpec::new("orders", "orders.worker").validate(),
            Err(SpecError::InvalidName { .. })
        );
        assert_matches!(
            ConsumerSpec::new("orders", "").validate(),
            Err(SpecError::InvalidName { .. })
        );
        assert_matches!(
            ConsumerSpec::new("orders", "w")
                .with_ack_wait(Duration::ZERO)
                .validate(),
            Err(SpecError::ZeroAckWait)
        );
    }

    #[test]
    fn test_stream_spec_validation() {
        assert!(StreamSpec::new("TestStream", ["TestSubject"]).validate().is_ok());
        assert!(StreamSpec::new("KV_cfg", ["$KV.cfg.>"]).validate().is_ok());

        assert_matches!(
            StreamSpec::new("orders", Vec::<String>::new()).validate(),
            Err(SpecError::NoSubjects(_))
        );
        assert_matches!(
            StreamSpec::new("my stream", ["orders"]).validate(),
            Err(SpecError::InvalidName { what: "stream", .. })
        );
        assert_matches!(
            StreamSpec::new("orders", ["orders..eu"]).validate(),
            Err(SpecError::InvalidSubject(_))
        );
    }
}
