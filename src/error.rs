use std::io;

use thiserror::Error;



/// Errors crossing the broker boundary.
///
/// `Clone` because one failed batch write is reported to every caller
/// waiting on that batch.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("transport ({kind:?}): {message}")]
    Transport { kind: io::ErrorKind, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("connection closed")]
    Closed,

    #[error("{0}")]
    Protocol(String),
}

impl BrokerError {
    pub fn transport(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        BrokerError::Transport { kind, message: message.into() }
    }

    /// Connection reset, broken pipe and end-of-stream: expected on long lived
    /// streaming connections, the reader recovers on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Transport { kind, message } => {
                matches!(
                    kind,
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof
                ) || mentions_transient(message)
            }
            BrokerError::Protocol(message) => mentions_transient(message),
            _ => false,
        }
    }

    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BrokerError::Cancelled | BrokerError::DeadlineExceeded)
    }
}

impl From<io::Error> for BrokerError {
    fn from(e: io::Error) -> Self {
        BrokerError::Transport { kind: e.kind(), message: e.to_string() }
    }
}

fn mentions_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("connection reset") || lower.contains("broken pipe")
}




#[derive(Debug, Error)]
pub enum MessengerError {

    // configuration
    #[error("topic is empty")]
    EmptyTopic,

    #[error("group id is empty")]
    EmptyGroupId,

    #[error("broker address is empty")]
    NoBrokers,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),


    // provisioning
    #[error("couldn't connect to any broker: {0}")]
    NoReachableBroker(#[source] BrokerError),

    #[error("failed to get controller: {0}")]
    Controller(#[source] BrokerError),

    #[error("failed to dial controller {address}: {source}")]
    ControllerUnreachable { address: String, source: BrokerError },

    #[error("failed to read partitions for topic {topic}: {source}")]
    ReadPartitions { topic: String, source: BrokerError },

    #[error("failed to create topic {topic}: {source}")]
    CreateTopic { topic: String, source: BrokerError },

    #[error("failed to create broker client: {0}")]
    Backend(#[source] BrokerError),


    // handle state
    #[error("producer is not initialized")]
    ProducerNotInitialized,

    #[error("consumer is not initialized")]
    ConsumerNotInitialized,

    #[error("consumer is already started")]
    AlreadyStarted,

    #[error("consumer is not running")]
    NotRunning,

    #[error("consumer must be started inside a tokio runtime")]
    NoRuntime,


    // steady state
    #[error("failed to write message: {0}")]
    Write(#[source] BrokerError),

    #[error("failed to read message: {0}")]
    Read(#[source] BrokerError),

    #[error("produce cancelled")]
    Cancelled,


    // teardown
    #[error("{}", describe_close(.producer, .consumer))]
    Close {
        producer: Option<BrokerError>,
        consumer: Option<BrokerError>,
    },
}

fn describe_close(producer: &Option<BrokerError>, consumer: &Option<BrokerError>) -> String {
    match (producer, consumer) {
        (Some(p), Some(c)) => format!("failed to close producer: {p}; and also failed to close consumer: {c}"),
        (Some(p), None) => format!("failed to close producer: {p}"),
        (None, Some(c)) => format!("failed to close consumer: {c}"),
        (None, None) => "close failed".to_owned(),
    }
}
