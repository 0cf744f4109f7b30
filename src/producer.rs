use std::sync::Arc;

use tokio::{sync::{mpsc, oneshot}, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    batcher::{self, WriteRequest},
    broker::{Record, RecordWriter},
    config::MessengerConfig,
    error::{BrokerError, MessengerError},
};



/// Write path of a messenger: callers hand records to a batching task and
/// wait for the batch they landed in to be written.
pub(crate) struct Producer {
    sender: mpsc::Sender<WriteRequest>,
    task: JoinHandle<Result<(), BrokerError>>,
}

impl Producer {

    /// Must be called inside a tokio runtime
    pub fn start(writer: Arc<dyn RecordWriter>, config: &MessengerConfig) -> Self {
        let (sender, recv) = mpsc::channel(config.batch_size.max(1));

        let task = batcher::Context::new(recv, writer, config.batch_size, config.batch_timeout).run();

        Producer { sender, task }
    }


    /// Returns once the record's batch has been written, or with the first of
    /// a write error or cancellation of `token`. Never retries.
    pub async fn produce(&self, token: &CancellationToken, record: Record) -> Result<(), MessengerError> {
        let (ack, done) = oneshot::channel();

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(MessengerError::Cancelled),
            res = self.sender.send(WriteRequest { record, ack }) => {
                if res.is_err() {
                    return Err(MessengerError::Write(BrokerError::Closed));
                }
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(MessengerError::Cancelled),
            res = done => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(MessengerError::Write(e)),
                // batcher went away with our record
                Err(_) => Err(MessengerError::Write(BrokerError::Closed)),
            }
        }
    }


    /// Flush whatever is pending, then close the writer
    pub async fn close(self) -> Result<(), BrokerError> {
        drop(self.sender);

        match self.task.await {
            Ok(res) => res,
            Err(e) => Err(BrokerError::Protocol(format!("batcher task failed: {e}"))),
        }
    }
}
