use std::time::Duration;

use crate::error::MessengerError;



pub const DEFAULT_PARTITIONS: i32 = 3;
pub const DEFAULT_REPLICATION_FACTOR: i32 = 1;

pub const BATCH_SIZE: usize = 100;
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(1);

pub const MESSAGE_CHANNEL_CAPACITY: usize = 100;
pub const ERROR_CHANNEL_CAPACITY: usize = 100;

/// How long the consumer waits on a full message channel before dropping the record
pub const MESSAGE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the consumer waits on a full error channel before dropping the error
pub const ERROR_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after connection reset, broken pipe or EOF before reading again
pub const TRANSIENT_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound `stop_consuming` waits for the consumer task
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);
pub const QUEUE_CAPACITY: usize = 100;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);




/// Everything one messenger binding needs.
///
/// Built from `(topic, group_id, brokers)`, the rest starts at the
/// crate constants and can be tuned with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    pub topic: String,
    pub group_id: String,
    pub brokers: Vec<String>,

    pub partitions: i32,
    pub replication_factor: i32,

    pub batch_size: usize,
    pub batch_timeout: Duration,

    pub message_capacity: usize,
    pub error_capacity: usize,
    pub message_send_timeout: Duration,
    pub error_send_timeout: Duration,
    pub transient_backoff: Duration,
    pub stop_timeout: Duration,

    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub queue_capacity: usize,
    pub connect_timeout: Duration,
}

impl MessengerConfig {
    pub fn new<I, S>(topic: &str, group_id: &str, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MessengerConfig {
            topic: topic.to_owned(),
            group_id: group_id.to_owned(),
            brokers: brokers.into_iter().map(Into::into).collect(),

            partitions: DEFAULT_PARTITIONS,
            replication_factor: DEFAULT_REPLICATION_FACTOR,

            batch_size: BATCH_SIZE,
            batch_timeout: BATCH_TIMEOUT,

            message_capacity: MESSAGE_CHANNEL_CAPACITY,
            error_capacity: ERROR_CHANNEL_CAPACITY,
            message_send_timeout: MESSAGE_SEND_TIMEOUT,
            error_send_timeout: ERROR_SEND_TIMEOUT,
            transient_backoff: TRANSIENT_BACKOFF,
            stop_timeout: STOP_TIMEOUT,

            session_timeout: SESSION_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            queue_capacity: QUEUE_CAPACITY,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_topic_layout(mut self, partitions: i32, replication_factor: i32) -> Self {
        self.partitions = partitions;
        self.replication_factor = replication_factor;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, batch_timeout: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn with_channel_capacity(mut self, messages: usize, errors: usize) -> Self {
        self.message_capacity = messages;
        self.error_capacity = errors;
        self
    }

    pub fn with_send_timeouts(mut self, message: Duration, error: Duration) -> Self {
        self.message_send_timeout = message;
        self.error_send_timeout = error;
        self
    }

    pub fn with_transient_backoff(mut self, backoff: Duration) -> Self {
        self.transient_backoff = backoff;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_group_timing(mut self, session_timeout: Duration, heartbeat_interval: Duration) -> Self {
        self.session_timeout = session_timeout;
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }


    /// Comma separated broker list, the form librdkafka expects
    #[inline]
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }


    pub fn validate(&self) -> Result<(), MessengerError> {
        if self.topic.trim().is_empty() {
            return Err(MessengerError::EmptyTopic);
        }

        if self.group_id.trim().is_empty() {
            return Err(MessengerError::EmptyGroupId);
        }

        if self.brokers.is_empty() {
            return Err(MessengerError::NoBrokers);
        }

        if self.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(MessengerError::InvalidConfig("broker address is blank".to_owned()));
        }

        if self.partitions <= 0 {
            return Err(MessengerError::InvalidConfig(format!("partitions must be positive, got {}", self.partitions)));
        }

        if self.replication_factor <= 0 {
            return Err(MessengerError::InvalidConfig(format!(
                "replication factor must be positive, got {}",
                self.replication_factor
            )));
        }

        if self.batch_size == 0 {
            return Err(MessengerError::InvalidConfig("batch size must be positive".to_owned()));
        }

        // mpsc::channel panics on zero capacity
        if self.message_capacity == 0 || self.error_capacity == 0 {
            return Err(MessengerError::InvalidConfig("channel capacity must be positive".to_owned()));
        }

        Ok(())
    }
}
