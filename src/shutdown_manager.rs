use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;



#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// task observed cancellation and exited on its own
    Graceful,

    /// timeout elapsed, task was aborted
    Forced,
}


/// Owns the cancellation side of a background task and its completion signal
pub(crate) struct ShutdownHandle {
    token: CancellationToken,
    done: JoinHandle<()>,
}

impl ShutdownHandle {

    pub fn new(token: CancellationToken, done: JoinHandle<()>) -> Self {
        ShutdownHandle { token, done }
    }


    /// Signal, then wait up to `timeout` for the task to finish.
    /// Past the timeout the task is aborted so it still releases what it owns.
    pub async fn shutdown(mut self, timeout: Duration) -> Shutdown {

        // Signal
        self.token.cancel();

        match tokio::time::timeout(timeout, &mut self.done).await {
            Ok(_) => Shutdown::Graceful,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "force closing consumer after timeout");
                self.done.abort();
                Shutdown::Forced
            }
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}




#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cooperative_task_stops_gracefully() {
        let token = CancellationToken::new();
        let child = token.clone();
        let task = tokio::spawn(async move { child.cancelled().await });

        let outcome = ShutdownHandle::new(token, task).shutdown(Duration::from_secs(1)).await;
        assert_eq!(outcome, Shutdown::Graceful);
    }

    #[tokio::test]
    async fn stuck_task_is_forced() {
        let token = CancellationToken::new();
        let task = tokio::spawn(async { std::future::pending::<()>().await });

        let outcome = ShutdownHandle::new(token, task).shutdown(Duration::from_millis(20)).await;
        assert_eq!(outcome, Shutdown::Forced);
    }
}
