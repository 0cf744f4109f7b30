//! Topic-bound messenger over a Kafka-style broker.
//!
//! A [`Messenger`] provisions its topic on construction, appends keyed
//! records through a size/time batched writer and runs at most one
//! background consumer that relays payloads over bounded channels.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kafka_messenger::{builtin::memory_cluster::MemoryCluster, CancellationToken, Messenger, MessengerConfig};
//!
//! # async fn run() -> Result<(), kafka_messenger::MessengerError> {
//! let cluster = Arc::new(MemoryCluster::new(["localhost:9092"]));
//! let mut messenger = Messenger::connect(cluster, MessengerConfig::new("orders", "billing", ["localhost:9092"])).await?;
//!
//! let token = CancellationToken::new();
//! let (mut messages, _errors) = messenger.start_consuming(&token)?;
//!
//! messenger.produce(&token, "k1", "hello").await?;
//! assert_eq!(messages.recv().await.as_deref(), Some("hello"));
//!
//! messenger.stop_consuming().await?;
//! messenger.close().await?;
//! # Ok(())
//! # }
//! ```


/// constants & MessengerConfig
pub mod config;

/// error taxonomy
pub mod error;

/// traits at the broker boundary
pub mod broker;

/// topic provisioning
pub mod provision;


/// size/time batched writes
mod batcher;

/// write path
mod producer;

/// background consumer task
mod consumer;

/// cancellation & bounded wait for background tasks
mod shutdown_manager;


mod messenger;


/// Built-in clusters
pub mod builtin;




pub use async_trait::async_trait;

pub use tokio_util::sync::CancellationToken;


pub use broker::{Cluster, ControlConnection, Record, RecordReader, RecordWriter, TopicDescriptor};

pub use config::{

    MessengerConfig,

    DEFAULT_PARTITIONS,
    DEFAULT_REPLICATION_FACTOR,
    BATCH_SIZE,
    BATCH_TIMEOUT,
    MESSAGE_CHANNEL_CAPACITY,
    ERROR_CHANNEL_CAPACITY,
    STOP_TIMEOUT,

};

pub use consumer::{ErrorReceiver, MessageReceiver};

pub use error::{BrokerError, MessengerError};

pub use messenger::Messenger;

pub use shutdown_manager::Shutdown;
