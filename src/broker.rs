use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{config::MessengerConfig, error::BrokerError};



/// One message on the log.
///
/// `partition` and `offset` are assigned by the broker and only
/// meaningful on records coming back from a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub key       : Vec<u8>,
    pub value     : Vec<u8>,
    pub partition : i32,
    pub offset    : i64,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Record {
            key: key.into(),
            value: value.into(),
            partition: -1,
            offset: -1,
        }
    }

    /// Payload as handed to the application
    #[inline]
    pub fn payload(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}


/// Only used while provisioning, not kept afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub topic: String,
    pub partitions: i32,
    pub replication_factor: i32,
}




/// Entry point to a broker cluster: hands out control connections and
/// the long lived write and read paths for one topic binding.
#[async_trait]
pub trait Cluster: Send + Sync {

    /// Raw control connection to a single broker
    async fn dial(&self, address: &str) -> Result<Box<dyn ControlConnection>, BrokerError>;

    fn writer(&self, config: &MessengerConfig) -> Result<Arc<dyn RecordWriter>, BrokerError>;

    fn reader(&self, config: &MessengerConfig) -> Result<Arc<dyn RecordReader>, BrokerError>;
}


#[async_trait]
pub trait ControlConnection: Send + Sync {

    /// Address of the node authoritative for topic metadata
    async fn controller(&self) -> Result<String, BrokerError>;

    /// Partition ids of `topic`, `UnknownTopicOrPartition` if it does not exist
    async fn read_partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError>;

    /// `TopicAlreadyExists` when another client won the race
    async fn create_topic(&self, descriptor: &TopicDescriptor) -> Result<(), BrokerError>;
}


#[async_trait]
pub trait RecordWriter: Send + Sync {

    async fn write_records(&self, records: Vec<Record>) -> Result<(), BrokerError>;

    // Call before drop
    async fn close(&self) -> Result<(), BrokerError>;
}


#[async_trait]
pub trait RecordReader: Send + Sync {

    /// Next record for the reader's group. Returns `BrokerError::Cancelled`
    /// once `token` fires, must not lose a record when it does.
    async fn read_next(&self, token: &CancellationToken) -> Result<Record, BrokerError>;

    // Call before drop
    async fn close(&self) -> Result<(), BrokerError>;
}
