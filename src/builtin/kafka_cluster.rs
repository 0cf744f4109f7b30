use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::RDKafkaLogLevel,
    error::{KafkaError, RDKafkaErrorCode},
    metadata::Metadata,
    ClientConfig,
};

use crate::{
    broker::{Cluster, ControlConnection, RecordReader, RecordWriter, TopicDescriptor},
    config::{MessengerConfig, CONNECT_TIMEOUT},
    error::BrokerError,
};

use super::{kafka_reader::KafkaReader, kafka_writer::KafkaWriter};



/// Kafka cluster reached through librdkafka
#[derive(Debug, Clone)]
pub struct KafkaCluster {
    connect_timeout: Duration,
}

impl KafkaCluster {
    pub fn new(connect_timeout: Duration) -> Self {
        KafkaCluster { connect_timeout }
    }
}

impl KafkaCluster {
    fn admin_config(&self, address: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", address)
            // topic lookups must not create the topic with broker defaults
            .set("allow.auto.create.topics", "false")
            .set("socket.connection.setup.timeout.ms", self.connect_timeout.as_millis().to_string())
            .set_log_level(RDKafkaLogLevel::Warning);
        config
    }
}

impl Default for KafkaCluster {
    fn default() -> Self {
        KafkaCluster::new(CONNECT_TIMEOUT)
    }
}


#[async_trait]
impl Cluster for KafkaCluster {

    async fn dial(&self, address: &str) -> Result<Box<dyn ControlConnection>, BrokerError> {
        let admin: AdminClient<DefaultClientContext> = self
            .admin_config(address)
            .create()
            .map_err(BrokerError::from)?;

        let conn = KafkaControl {
            admin: Arc::new(admin),
            address: address.to_owned(),
            timeout: self.connect_timeout,
        };

        // librdkafka connects lazily, make it prove the broker answers
        conn.metadata(None).await?;

        Ok(Box::new(conn))
    }

    fn writer(&self, config: &MessengerConfig) -> Result<Arc<dyn RecordWriter>, BrokerError> {
        Ok(Arc::new(KafkaWriter::new(config)?))
    }

    fn reader(&self, config: &MessengerConfig) -> Result<Arc<dyn RecordReader>, BrokerError> {
        Ok(Arc::new(KafkaReader::new(config)?))
    }
}




/// Admin connection bootstrapped from one broker.
///
/// librdkafka routes CreateTopics to the controller on its own, the
/// controller address reported here is the advertised address of the broker
/// that answered.
struct KafkaControl {
    admin: Arc<AdminClient<DefaultClientContext>>,
    address: String,
    timeout: Duration,
}

impl KafkaControl {

    /// fetch_metadata blocks, keep it off the runtime threads
    async fn metadata(&self, topic: Option<&str>) -> Result<ClusterView, BrokerError> {
        let admin = self.admin.clone();
        let topic = topic.map(str::to_owned);
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            admin
                .inner()
                .fetch_metadata(topic.as_deref(), timeout)
                .map(|m| ClusterView::from(&m))
        })
        .await
        .map_err(|e| BrokerError::Protocol(format!("metadata task failed: {e}")))?
        .map_err(BrokerError::from)
    }
}

#[async_trait]
impl ControlConnection for KafkaControl {

    async fn controller(&self) -> Result<String, BrokerError> {
        let view = self.metadata(None).await?;
        Ok(view.answered_by.unwrap_or_else(|| self.address.clone()))
    }

    async fn read_partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let view = self.metadata(Some(topic)).await?;

        let found = view
            .topics
            .into_iter()
            .find(|t| t.name == topic)
            .ok_or_else(|| BrokerError::UnknownTopicOrPartition(topic.to_owned()))?;

        if let Some(code) = found.error {
            return Err(from_code(code, topic));
        }

        Ok(found.partitions)
    }

    async fn create_topic(&self, descriptor: &TopicDescriptor) -> Result<(), BrokerError> {
        let topic = NewTopic::new(
            &descriptor.topic,
            descriptor.partitions,
            TopicReplication::Fixed(descriptor.replication_factor),
        );

        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self
            .admin
            .create_topics(&[topic], &opts)
            .await
            .map_err(BrokerError::from)?;

        for result in results {
            if let Err((name, code)) = result {
                return Err(from_code(code, &name));
            }
        }

        Ok(())
    }
}


/// Owned copy of the bits of cluster metadata we look at
struct ClusterView {
    answered_by: Option<String>,
    topics: Vec<TopicView>,
}

struct TopicView {
    name: String,
    error: Option<RDKafkaErrorCode>,
    partitions: Vec<i32>,
}

impl From<&Metadata> for ClusterView {
    fn from(m: &Metadata) -> Self {
        let id = m.orig_broker_id();

        ClusterView {
            answered_by: m
                .brokers()
                .iter()
                .find(|b| b.id() == id)
                .map(|b| format!("{}:{}", b.host(), b.port())),
            topics: m
                .topics()
                .iter()
                .map(|t| TopicView {
                    name: t.name().to_owned(),
                    error: t.error().map(RDKafkaErrorCode::from),
                    partitions: t.partitions().iter().map(|p| p.id()).collect(),
                })
                .collect(),
        }
    }
}




fn from_code(code: RDKafkaErrorCode, topic: &str) -> BrokerError {
    match code {
        RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
            BrokerError::UnknownTopicOrPartition(topic.to_owned())
        }
        RDKafkaErrorCode::TopicAlreadyExists => BrokerError::TopicAlreadyExists(topic.to_owned()),
        RDKafkaErrorCode::BrokerTransportFailure
        | RDKafkaErrorCode::AllBrokersDown
        | RDKafkaErrorCode::NetworkException => {
            BrokerError::transport(io::ErrorKind::ConnectionReset, code.to_string())
        }
        RDKafkaErrorCode::PartitionEOF => BrokerError::transport(io::ErrorKind::UnexpectedEof, code.to_string()),
        RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::RequestTimedOut => BrokerError::DeadlineExceeded,
        other => BrokerError::Protocol(other.to_string()),
    }
}


impl From<KafkaError> for BrokerError {
    fn from(e: KafkaError) -> Self {
        if let KafkaError::PartitionEOF(partition) = e {
            return BrokerError::transport(io::ErrorKind::UnexpectedEof, format!("end of partition {partition}"));
        }

        match e.rdkafka_error_code() {
            Some(code) => match from_code(code, "") {
                BrokerError::Protocol(_) => BrokerError::Protocol(e.to_string()),
                mapped => mapped,
            },
            None => BrokerError::Protocol(e.to_string()),
        }
    }
}
