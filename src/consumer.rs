use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    broker::RecordReader,
    config::MessengerConfig,
    error::MessengerError,
    shutdown_manager::{Shutdown, ShutdownHandle},
};



pub type MessageReceiver = mpsc::Receiver<String>;
pub type ErrorReceiver = mpsc::Receiver<MessengerError>;



/// A running consumer task. Its channels belong to the task and are closed
/// when the task exits, so every session hands out fresh ones.
pub(crate) struct ConsumerSession {
    shutdown: ShutdownHandle,
}

impl ConsumerSession {

    /// Spawn the consumer task on the current runtime, cancelled together
    /// with `parent`.
    pub fn start(reader: Arc<dyn RecordReader>,
                 config: &MessengerConfig,
                 parent: &CancellationToken) -> Result<(Self, MessageReceiver, ErrorReceiver), MessengerError> {

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MessengerError::NoRuntime)?;

        let (msg_tx, msg_rx) = mpsc::channel(config.message_capacity);
        let (err_tx, err_rx) = mpsc::channel(config.error_capacity);

        let token = parent.child_token();

        let ctx = Context {
            reader,
            token: token.clone(),
            messages: msg_tx,
            errors: err_tx,
            topic: config.topic.clone(),
            group: config.group_id.clone(),
            message_send_timeout: config.message_send_timeout,
            error_send_timeout: config.error_send_timeout,
            transient_backoff: config.transient_backoff,
        };

        let done = runtime.spawn(ctx.run());

        Ok((ConsumerSession { shutdown: ShutdownHandle::new(token, done) }, msg_rx, err_rx))
    }


    pub async fn stop(self, timeout: Duration) -> Shutdown {
        self.shutdown.shutdown(timeout).await
    }
}




enum Step {
    Continue,
    Exit,
}


struct Context {
    reader: Arc<dyn RecordReader>,
    token: CancellationToken,

    messages: mpsc::Sender<String>,
    errors: mpsc::Sender<MessengerError>,

    topic: String,
    group: String,

    message_send_timeout: Duration,
    error_send_timeout: Duration,
    transient_backoff: Duration,
}

impl Context {

    async fn run(self) {
        info!(topic = %self.topic, group = %self.group, "consumer task started");

        loop {
            if self.token.is_cancelled() {
                info!(topic = %self.topic, group = %self.group, "consumer task received cancellation");
                break;
            }

            let step = match self.reader.read_next(&self.token).await {
                Ok(record) => {
                    debug!(topic = %self.topic, partition = record.partition, offset = record.offset, "read record");
                    self.deliver(record.payload()).await
                }

                // top of the loop decides
                Err(e) if e.is_cancellation() => {
                    debug!(topic = %self.topic, error = %e, "read interrupted");
                    Step::Continue
                }

                Err(e) if e.is_transient() => {
                    warn!(topic = %self.topic, error = %e, "network error, retrying");
                    self.backoff().await
                }

                Err(e) => {
                    error!(topic = %self.topic, error = %e, "failed to read message");
                    self.report(MessengerError::Read(e)).await
                }
            };

            if let Step::Exit = step {
                break;
            }
        }

        // channels close here, when `self` drops
        info!(topic = %self.topic, group = %self.group, "consumer task exiting");
    }


    async fn deliver(&self, payload: String) -> Step {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(topic = %self.topic, "cancelled while delivering message");
                Step::Exit
            }
            res = self.messages.send_timeout(payload, self.message_send_timeout) => match res {
                Ok(()) => Step::Continue,
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(topic = %self.topic, "message channel full, possible consumer stall; message dropped");
                    Step::Continue
                }
                Err(SendTimeoutError::Closed(_)) => {
                    warn!(topic = %self.topic, "message receiver dropped, stopping consumer");
                    Step::Exit
                }
            }
        }
    }


    async fn report(&self, err: MessengerError) -> Step {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Step::Exit,
            res = self.errors.send_timeout(err, self.error_send_timeout) => {
                match res {
                    Ok(()) => (),
                    Err(SendTimeoutError::Timeout(e)) => {
                        warn!(topic = %self.topic, error = %e, "error channel full, dropping error");
                    }
                    Err(SendTimeoutError::Closed(e)) => {
                        debug!(topic = %self.topic, error = %e, "error receiver dropped");
                    }
                }
                Step::Continue
            }
        }
    }


    async fn backoff(&self) -> Step {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Step::Exit,
            _ = tokio::time::sleep(self.transient_backoff) => Step::Continue,
        }
    }
}
