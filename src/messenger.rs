use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    broker::{Cluster, Record, RecordReader, TopicDescriptor},
    config::MessengerConfig,
    consumer::{ConsumerSession, ErrorReceiver, MessageReceiver},
    error::{BrokerError, MessengerError},
    producer::Producer,
    provision,
    shutdown_manager::Shutdown,
};



/// One (topic, consumer group, brokers) binding.
///
/// Owns a batched write path and a group reader for the topic, and at most
/// one background consumer session at a time. Dropping the handle cancels a
/// running session; `close` should still be called to release the broker
/// connections cleanly.
pub struct Messenger {
    config: MessengerConfig,
    cluster: Arc<dyn Cluster>,

    producer: Option<Producer>,
    reader: Option<Arc<dyn RecordReader>>,

    session: Option<ConsumerSession>,
}

impl Messenger {

    /// Bind to `topic` on a Kafka cluster with the default settings.
    ///
    /// ```no_run
    /// # async fn run() -> Result<(), kafka_messenger::MessengerError> {
    /// let mut messenger = kafka_messenger::Messenger::new("orders", "billing", ["localhost:9092"]).await?;
    /// messenger.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "kafka")]
    pub async fn new<I, S>(topic: &str, group_id: &str, brokers: I) -> Result<Self, MessengerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = MessengerConfig::new(topic, group_id, brokers);
        let cluster = crate::builtin::kafka_cluster::KafkaCluster::new(config.connect_timeout);

        Messenger::connect(Arc::new(cluster), config).await
    }


    /// Open writer and reader, then make sure the topic exists with the
    /// configured layout. If provisioning fails both are closed again and the
    /// provisioning error is returned.
    pub async fn connect(cluster: Arc<dyn Cluster>, config: MessengerConfig) -> Result<Self, MessengerError> {
        config.validate()?;

        let writer = cluster.writer(&config).map_err(MessengerError::Backend)?;

        let reader = match cluster.reader(&config) {
            Ok(r) => r,
            Err(e) => {
                if let Err(close_err) = writer.close().await {
                    warn!(topic = %config.topic, error = %close_err, "failed to close producer");
                }
                return Err(MessengerError::Backend(e));
            }
        };

        let mut messenger = Messenger {
            producer: Some(Producer::start(writer, &config)),
            reader: Some(reader),
            session: None,
            config,
            cluster,
        };

        let partitions = messenger.config.partitions;
        let replication_factor = messenger.config.replication_factor;

        if let Err(e) = messenger.ensure_topic(partitions, replication_factor).await {
            if let Err(close_err) = messenger.close().await {
                warn!(topic = %messenger.config.topic, error = %close_err, "teardown after failed provisioning");
            }
            return Err(e);
        }

        Ok(messenger)
    }


    #[inline]
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    #[inline]
    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    #[inline]
    pub fn brokers(&self) -> &[String] {
        &self.config.brokers
    }

    #[inline]
    pub fn is_consuming(&self) -> bool {
        self.session.is_some()
    }


    /// Create the topic with `partitions` and `replication_factor` unless it
    /// already exists.
    pub async fn ensure_topic(&self, partitions: i32, replication_factor: i32) -> Result<(), MessengerError> {
        let descriptor = TopicDescriptor {
            topic: self.config.topic.clone(),
            partitions,
            replication_factor,
        };

        provision::ensure_topic(self.cluster.as_ref(), &self.config.brokers, &descriptor).await
    }


    /// Append one record. `key` may be empty.
    ///
    /// Returns when the batch holding the record has been written. Write
    /// errors come back as they are, retrying is up to the caller.
    pub async fn produce(&self,
                         token: &CancellationToken,
                         key: impl Into<Vec<u8>>,
                         value: impl Into<Vec<u8>>) -> Result<(), MessengerError> {

        let producer = self.producer.as_ref().ok_or(MessengerError::ProducerNotInitialized)?;

        producer.produce(token, Record::new(key, value)).await
    }


    /// Start the background consumer, cancelled together with `token`.
    ///
    /// Payloads arrive on the first receiver, read failures worth reporting on
    /// the second. Both close when the session ends.
    pub fn start_consuming(&mut self, token: &CancellationToken) -> Result<(MessageReceiver, ErrorReceiver), MessengerError> {
        let reader = self.reader.as_ref().ok_or(MessengerError::ConsumerNotInitialized)?;

        if self.session.is_some() {
            return Err(MessengerError::AlreadyStarted);
        }

        let (session, messages, errors) = ConsumerSession::start(reader.clone(), &self.config, token)?;
        self.session = Some(session);

        info!(topic = %self.config.topic, group = %self.config.group_id, "consuming");

        Ok((messages, errors))
    }


    /// Cancel the running session and wait up to the stop timeout for it.
    /// The handle is idle afterwards either way.
    pub async fn stop_consuming(&mut self) -> Result<Shutdown, MessengerError> {
        let session = self.session.take().ok_or(MessengerError::NotRunning)?;

        info!(topic = %self.config.topic, "signaling consumer to stop");

        let outcome = session.stop(self.config.stop_timeout).await;

        info!(topic = %self.config.topic, ?outcome, "consumer stopped");
        Ok(outcome)
    }


    /// Stop consuming and close both broker paths. Failures of the producer
    /// and the consumer are reported together. Calling again is a no-op.
    pub async fn close(&mut self) -> Result<(), MessengerError> {
        if let Some(session) = self.session.take() {
            let outcome = session.stop(self.config.stop_timeout).await;
            info!(topic = %self.config.topic, ?outcome, "consumer stopped before close");
        }

        let mut producer_err = None;
        let mut consumer_err = None;

        if let Some(producer) = self.producer.take() {
            info!(topic = %self.config.topic, "closing producer");
            if let Err(e) = producer.close().await {
                warn!(topic = %self.config.topic, error = %e, "failed to close producer");
                producer_err = Some(e);
            }
        }

        if let Some(reader) = self.reader.take() {
            info!(topic = %self.config.topic, "closing consumer");
            if let Err(e) = reader.close().await {
                warn!(topic = %self.config.topic, error = %e, "failed to close consumer");
                consumer_err = Some(e);
            }
        }

        close_result(producer_err, consumer_err)
    }
}


fn close_result(producer: Option<BrokerError>, consumer: Option<BrokerError>) -> Result<(), MessengerError> {
    if producer.is_none() && consumer.is_none() {
        return Ok(());
    }

    Err(MessengerError::Close { producer, consumer })
}




#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::builtin::memory_cluster::MemoryCluster;

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> MessengerConfig {
        MessengerConfig::new("orders", "billing", ["b1:9092"])
            .with_batching(1, Duration::from_millis(10))
            .with_send_timeouts(Duration::from_millis(20), Duration::from_millis(20))
    }

    async fn messenger(cluster: &MemoryCluster) -> Messenger {
        Messenger::connect(Arc::new(cluster.clone()), config()).await.unwrap()
    }

    #[tokio::test]
    async fn connect_validates_arguments() {
        let cluster = MemoryCluster::new(["b1:9092"]);

        let res = Messenger::connect(Arc::new(cluster.clone()), MessengerConfig::new("", "g", ["b1:9092"])).await;
        assert!(matches!(res, Err(MessengerError::EmptyTopic)));

        let res = Messenger::connect(Arc::new(cluster), MessengerConfig::new("orders", "g", Vec::<String>::new())).await;
        assert!(matches!(res, Err(MessengerError::NoBrokers)));
    }

    #[tokio::test]
    async fn failed_provisioning_tears_down_both_paths() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        cluster.set_reachable("b1:9092", false);

        let res = Messenger::connect(Arc::new(cluster.clone()), config()).await;
        assert!(matches!(res, Err(MessengerError::NoReachableBroker(_))));
        assert_eq!(cluster.writes(), 0);
        assert_eq!(cluster.closes(), (1, 1));
    }

    #[tokio::test]
    async fn failed_topic_creation_tears_down_both_paths() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        cluster.fail_next_create(BrokerError::Protocol("cluster authorization failed".into()));

        let res = Messenger::connect(Arc::new(cluster.clone()), config()).await;
        assert!(matches!(res, Err(MessengerError::CreateTopic { .. })));
        assert_eq!(cluster.closes(), (1, 1));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;
        let token = CancellationToken::new();

        let _channels = m.start_consuming(&token).unwrap();
        assert!(matches!(m.start_consuming(&token), Err(MessengerError::AlreadyStarted)));

        m.stop_consuming().await.unwrap();
        m.close().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_session_is_rejected() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;

        assert!(matches!(m.stop_consuming().await, Err(MessengerError::NotRunning)));
    }

    #[tokio::test]
    async fn restart_hands_out_fresh_channels() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;
        let token = CancellationToken::new();

        let (mut first, _first_errors) = m.start_consuming(&token).unwrap();
        m.stop_consuming().await.unwrap();
        assert!(first.recv().await.is_none());

        let (mut second, _second_errors) = m.start_consuming(&token).unwrap();
        m.produce(&token, "k1", "again").await.unwrap();

        let got = tokio::time::timeout(WAIT, second.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("again"));

        m.close().await.unwrap();
    }

    #[tokio::test]
    async fn produce_after_close_is_rejected_without_io() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;
        m.close().await.unwrap();

        let writes = cluster.writes();
        let res = m.produce(&CancellationToken::new(), "k", "v").await;

        assert!(matches!(res, Err(MessengerError::ProducerNotInitialized)));
        assert_eq!(cluster.writes(), writes);
    }

    #[tokio::test]
    async fn start_after_close_is_rejected() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;
        m.close().await.unwrap();

        assert!(matches!(
            m.start_consuming(&CancellationToken::new()),
            Err(MessengerError::ConsumerNotInitialized)
        ));
    }

    #[tokio::test]
    async fn produce_surfaces_write_errors() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let m = messenger(&cluster).await;
        cluster.fail_next_write(BrokerError::transport(std::io::ErrorKind::BrokenPipe, "write"));

        let res = m.produce(&CancellationToken::new(), "k", "v").await;
        assert!(matches!(res, Err(MessengerError::Write(_))));

        // no retry behind the caller's back
        assert!(cluster.records("orders").is_empty());
    }

    #[tokio::test]
    async fn cancelled_produce_returns_cancelled() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let m = messenger(&cluster).await;

        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(m.produce(&token, "k", "v").await, Err(MessengerError::Cancelled)));
    }

    #[tokio::test]
    async fn close_stops_running_session() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;

        let (mut messages, _errors) = m.start_consuming(&CancellationToken::new()).unwrap();
        m.close().await.unwrap();

        assert!(!m.is_consuming());
        assert!(messages.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_reports_both_failures() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let mut m = messenger(&cluster).await;
        cluster.fail_next_close(BrokerError::Protocol("flush timed out".into()));
        cluster.fail_next_close(BrokerError::Protocol("leave group failed".into()));

        match m.close().await {
            Err(MessengerError::Close { producer: Some(_), consumer: Some(_) }) => (),
            other => panic!("unexpected close result: {other:?}"),
        }

        // both paths are gone even though closing them failed
        m.close().await.unwrap();
    }
}
