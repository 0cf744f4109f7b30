use std::{sync::Arc, time::Duration};

use tokio::{sync::{mpsc, oneshot}, task::JoinHandle, time::Instant};
use tracing::{debug, warn};

use crate::{broker::{Record, RecordWriter}, error::BrokerError};



pub(crate) type Ack = oneshot::Sender<Result<(), BrokerError>>;

pub(crate) struct WriteRequest {
    pub record: Record,
    pub ack: Ack,
}



/// Collects write requests and hands them to the writer
///
/// * when batch is full, flush
/// * or `batch_timeout` after the first record of the batch, flush
///
/// Every request in a batch is acked with the result of its batch. When all
/// senders are gone the rest is flushed and the writer closed; the task
/// resolves to the close result.
pub(crate) struct Context {
    recv: mpsc::Receiver<WriteRequest>,
    writer: Arc<dyn RecordWriter>,

    batch_size: usize,
    batch_timeout: Duration,
}

impl Context {

    pub fn new(recv: mpsc::Receiver<WriteRequest>,
               writer: Arc<dyn RecordWriter>,
               batch_size: usize,
               batch_timeout: Duration) -> Self
    {
        Context {
            recv,
            writer,
            batch_size: batch_size.max(1),
            batch_timeout,
        }
    }


    #[inline]
    pub fn run(mut self) -> JoinHandle<Result<(), BrokerError>> {
        tokio::spawn(async move {

            let mut batch = Vec::with_capacity(self.batch_size);

            // armed by the first record of each batch
            let mut deadline = Instant::now();

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline), if !batch.is_empty() => {
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                        self.flush(full).await;
                    }
                    res = self.recv.recv() => {
                        match res {
                            Some(req) => {
                                if batch.is_empty() {
                                    deadline = Instant::now() + self.batch_timeout;
                                }

                                batch.push(req);

                                if batch.len() >= self.batch_size {
                                    let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                                    self.flush(full).await;
                                }
                            }
                            None => {
                                if !batch.is_empty() {
                                    self.flush(batch).await;
                                }

                                return self.writer.close().await;
                            }
                        }
                    }
                }
            }
        })
    }


    async fn flush(&self, batch: Vec<WriteRequest>) {
        let (records, acks): (Vec<Record>, Vec<Ack>) =
            batch.into_iter().map(|r| (r.record, r.ack)).unzip();

        let count = records.len();
        let res = self.writer.write_records(records).await;

        match &res {
            Ok(()) => debug!(records = count, "flushed batch"),
            Err(e) => warn!(records = count, error = %e, "batch write failed"),
        }

        for ack in acks {
            // caller may have given up waiting
            let _ = ack.send(res.clone());
        }
    }
}




#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::memory_cluster::MemoryCluster;
    use crate::broker::{Cluster, TopicDescriptor};
    use crate::config::MessengerConfig;

    async fn writer_for(cluster: &MemoryCluster) -> Arc<dyn RecordWriter> {
        let conn = cluster.dial("b1:9092").await.unwrap();
        conn.create_topic(&TopicDescriptor { topic: "orders".into(), partitions: 1, replication_factor: 1 })
            .await
            .unwrap();

        cluster.writer(&MessengerConfig::new("orders", "g", ["b1:9092"])).unwrap()
    }

    fn request(value: &str) -> (WriteRequest, oneshot::Receiver<Result<(), BrokerError>>) {
        let (ack, rx) = oneshot::channel();
        (WriteRequest { record: Record::new("", value), ack }, rx)
    }

    #[tokio::test]
    async fn flushes_when_batch_is_full() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let writer = writer_for(&cluster).await;

        let (tx, rx) = mpsc::channel(8);
        let task = Context::new(rx, writer, 2, Duration::from_secs(3600)).run();

        let (a, a_rx) = request("a");
        let (b, b_rx) = request("b");
        tx.send(a).await.unwrap();
        tx.send(b).await.unwrap();

        a_rx.await.unwrap().unwrap();
        b_rx.await.unwrap().unwrap();
        assert_eq!(cluster.writes(), 1);

        drop(tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn flushes_partial_batch_after_timeout() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let writer = writer_for(&cluster).await;

        let (tx, rx) = mpsc::channel(8);
        let _task = Context::new(rx, writer, 100, Duration::from_millis(20)).run();

        let (a, a_rx) = request("a");
        tx.send(a).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), a_rx).await.unwrap().unwrap().unwrap();
        assert_eq!(cluster.records("orders").len(), 1);
    }

    #[tokio::test]
    async fn write_failure_reaches_every_caller_in_batch() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let writer = writer_for(&cluster).await;
        cluster.fail_next_write(BrokerError::transport(std::io::ErrorKind::BrokenPipe, "write"));

        let (tx, rx) = mpsc::channel(8);
        let _task = Context::new(rx, writer, 2, Duration::from_secs(3600)).run();

        let (a, a_rx) = request("a");
        let (b, b_rx) = request("b");
        tx.send(a).await.unwrap();
        tx.send(b).await.unwrap();

        assert!(a_rx.await.unwrap().is_err());
        assert!(b_rx.await.unwrap().is_err());
        assert!(cluster.records("orders").is_empty());
    }

    #[tokio::test]
    async fn drains_and_closes_when_senders_drop() {
        let cluster = MemoryCluster::new(["b1:9092"]);
        let writer = writer_for(&cluster).await;

        let (tx, rx) = mpsc::channel(8);
        let task = Context::new(rx, writer, 100, Duration::from_secs(3600)).run();

        let (a, a_rx) = request("a");
        tx.send(a).await.unwrap();
        drop(tx);

        task.await.unwrap().unwrap();
        a_rx.await.unwrap().unwrap();
        assert_eq!(cluster.records("orders").len(), 1);
    }
}
