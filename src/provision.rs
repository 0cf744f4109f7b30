use tracing::{debug, info, warn};

use crate::{
    broker::{Cluster, ControlConnection, TopicDescriptor},
    error::{BrokerError, MessengerError},
};



/// Make sure `descriptor.topic` exists on the cluster behind `brokers`.
///
/// Brokers are tried in order, the first one that answers is asked for the
/// controller and the topic is looked up and, if missing, created through a
/// dedicated connection to that controller. An existing topic, or losing a
/// creation race to another client, both count as success.
pub async fn ensure_topic(cluster: &dyn Cluster,
                          brokers: &[String],
                          descriptor: &TopicDescriptor) -> Result<(), MessengerError> {

    let conn = dial_any(cluster, brokers).await?;

    let controller = conn.controller().await.map_err(MessengerError::Controller)?;
    debug!(controller = %controller, "resolved cluster controller");

    let controller_conn = cluster
        .dial(&controller)
        .await
        .map_err(|source| MessengerError::ControllerUnreachable { address: controller.clone(), source })?;

    let topic = &descriptor.topic;

    match controller_conn.read_partitions(topic).await {
        Ok(partitions) if !partitions.is_empty() => {
            info!(topic = %topic, partitions = partitions.len(), "topic already exists");
            return Ok(());
        }
        // no metadata at all is the same as not found
        Ok(_) | Err(BrokerError::UnknownTopicOrPartition(_)) => (),
        Err(source) => {
            return Err(MessengerError::ReadPartitions { topic: topic.clone(), source });
        }
    }

    match controller_conn.create_topic(descriptor).await {
        Ok(()) => {
            info!(
                topic = %topic,
                partitions = descriptor.partitions,
                replication_factor = descriptor.replication_factor,
                "created topic"
            );
            Ok(())
        }
        Err(BrokerError::TopicAlreadyExists(_)) => {
            info!(topic = %topic, "topic already exists");
            Ok(())
        }
        Err(source) => Err(MessengerError::CreateTopic { topic: topic.clone(), source }),
    }
}


async fn dial_any(cluster: &dyn Cluster, brokers: &[String]) -> Result<Box<dyn ControlConnection>, MessengerError> {
    let mut last_err = None;

    for broker in brokers {
        match cluster.dial(broker).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(broker = %broker, error = %e, "failed to connect to broker");
                last_err = Some(e);
            }
        }
    }

    let cause = last_err.unwrap_or_else(|| BrokerError::Protocol("no broker addresses configured".to_owned()));
    Err(MessengerError::NoReachableBroker(cause))
}




#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::memory_cluster::MemoryCluster;

    fn descriptor(topic: &str) -> TopicDescriptor {
        TopicDescriptor { topic: topic.to_owned(), partitions: 3, replication_factor: 1 }
    }

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn creates_missing_topic_once() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let brokers = addrs(&["b1:9092"]);

        ensure_topic(&cluster, &brokers, &descriptor("orders")).await.unwrap();
        ensure_topic(&cluster, &brokers, &descriptor("orders")).await.unwrap();

        assert_eq!(cluster.partition_count("orders"), Some(3));
        assert_eq!(cluster.topic_creations(), 1);
    }

    #[tokio::test]
    async fn skips_unreachable_brokers() {
        let cluster = MemoryCluster::new(["b1:9092", "b2:9092"]);
        cluster.set_reachable("b2:9092", false);

        let brokers = addrs(&["b2:9092", "unknown:1", "b1:9092"]);
        ensure_topic(&cluster, &brokers, &descriptor("orders")).await.unwrap();

        assert_eq!(cluster.partition_count("orders"), Some(3));
    }

    #[tokio::test]
    async fn fails_when_no_broker_answers() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        cluster.set_reachable("b1:9092", false);

        let err = ensure_topic(&cluster, &addrs(&["b1:9092"]), &descriptor("orders")).await.unwrap_err();
        assert!(matches!(err, MessengerError::NoReachableBroker(_)));
    }

    #[tokio::test]
    async fn fails_when_controller_is_unreachable() {
        // b1 is the controller, only b2 is up
        let cluster = MemoryCluster::new(["b1:9092", "b2:9092"]);
        cluster.set_reachable("b1:9092", false);

        let err = ensure_topic(&cluster, &addrs(&["b2:9092"]), &descriptor("orders")).await.unwrap_err();
        assert!(matches!(err, MessengerError::ControllerUnreachable { ref address, .. } if address == "b1:9092"));
    }

    #[tokio::test]
    async fn lost_creation_race_is_success() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let brokers = addrs(&["b1:9092"]);
        ensure_topic(&cluster, &brokers, &descriptor("orders")).await.unwrap();

        // metadata lags behind a concurrent creation
        cluster.fail_next_metadata(BrokerError::UnknownTopicOrPartition("orders".into()));
        ensure_topic(&cluster, &brokers, &descriptor("orders")).await.unwrap();
    }

    #[tokio::test]
    async fn metadata_failure_is_fatal() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        cluster.fail_next_metadata(BrokerError::Protocol("not authorized".into()));

        let err = ensure_topic(&cluster, &addrs(&["b1:9092"]), &descriptor("orders")).await.unwrap_err();
        assert!(matches!(err, MessengerError::ReadPartitions { .. }));
        assert_eq!(cluster.topic_creations(), 0);
    }

    #[tokio::test]
    async fn creation_failure_is_fatal() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        cluster.fail_next_create(BrokerError::Protocol("invalid replication factor".into()));

        let err = ensure_topic(&cluster, &addrs(&["b1:9092"]), &descriptor("orders")).await.unwrap_err();
        assert!(matches!(err, MessengerError::CreateTopic { .. }));
        assert_eq!(cluster.partition_count("orders"), None);
    }
}
