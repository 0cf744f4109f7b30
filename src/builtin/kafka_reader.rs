use async_trait::async_trait;
use rdkafka::{
    config::RDKafkaLogLevel,
    consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer},
    error::KafkaResult,
    ClientConfig, ClientContext, Message, TopicPartitionList,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    broker::{Record, RecordReader},
    config::MessengerConfig,
    error::BrokerError,
};



// A type alias with the logging context
type LoggingConsumer = StreamConsumer<LoggingContext>;


struct LoggingContext {
    topic: String,
}

impl ClientContext for LoggingContext {}

impl ConsumerContext for LoggingContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        info!(topic = %self.topic, ?rebalance, "pre rebalance");
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        info!(topic = %self.topic, ?rebalance, "post rebalance");
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        debug!(topic = %self.topic, ?result, "committed offsets");
    }
}


/// Group member reading one topic, starting from the earliest offset the
/// group has not committed yet. Offsets are auto committed.
pub struct KafkaReader {
    kafka_consumer: LoggingConsumer,
}

impl KafkaReader {
    pub fn new(config: &MessengerConfig) -> Result<Self, BrokerError> {

        let context = LoggingContext { topic: config.topic.clone() };

        let consumer: LoggingConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", config.session_timeout.as_millis().to_string())
            .set("heartbeat.interval.ms", config.heartbeat_interval.as_millis().to_string())
            .set("queued.min.messages", config.queue_capacity.to_string())
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set_log_level(RDKafkaLogLevel::Warning)
            .create_with_context(context)
            .map_err(BrokerError::from)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(BrokerError::from)?;

        Ok(KafkaReader { kafka_consumer: consumer })
    }
}


#[async_trait]
impl RecordReader for KafkaReader {

    async fn read_next(&self, token: &CancellationToken) -> Result<Record, BrokerError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(BrokerError::Cancelled),
            res = self.kafka_consumer.recv() => {
                let m = res.map_err(BrokerError::from)?;

                Ok(Record {
                    key: m.key().map(<[u8]>::to_vec).unwrap_or_default(),
                    value: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    partition: m.partition(),
                    offset: m.offset(),
                })
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        // leave the group now instead of waiting for the session to expire
        self.kafka_consumer.unsubscribe();
        Ok(())
    }
}
