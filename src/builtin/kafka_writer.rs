use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::{
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
    ClientConfig,
};

use crate::{
    broker::{Record, RecordWriter},
    config::MessengerConfig,
    error::BrokerError,
};



pub struct KafkaWriter {
    fut_producer: FutureProducer,
    topic_name: String,
    flush_timeout: Duration,
}

impl KafkaWriter {
    pub fn new(config: &MessengerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("batch.num.messages", config.batch_size.to_string())
            .set("linger.ms", config.batch_timeout.as_millis().to_string())
            // failures go back to the caller, no hidden resends
            .set("message.send.max.retries", "0")
            .set("message.timeout.ms", config.session_timeout.as_millis().to_string())
            .create()
            .map_err(BrokerError::from)?;

        Ok(KafkaWriter {
            fut_producer: producer,
            topic_name: config.topic.clone(),
            flush_timeout: config.stop_timeout,
        })
    }
}


#[async_trait]
impl RecordWriter for KafkaWriter {

    async fn write_records(&self, records: Vec<Record>) -> Result<(), BrokerError> {

        let deliveries = records.iter().map(|rec| {
            let mut fut_rec = FutureRecord::to(&self.topic_name).payload(&rec.value);
            if !rec.key.is_empty() {
                fut_rec = fut_rec.key(&rec.key);
            }

            self.fut_producer.send(fut_rec, Timeout::Never)
        });

        // whole batch is delivered or the first failure is reported
        for res in join_all(deliveries).await {
            if let Err((ke, _)) = res {
                return Err(BrokerError::from(ke));
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let producer = self.fut_producer.clone();
        let timeout = self.flush_timeout;

        // flush blocks on librdkafka
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Protocol(format!("flush task failed: {e}")))?
            .map_err(BrokerError::from)
    }
}
