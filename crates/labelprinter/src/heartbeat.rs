//! Idle status heartbeat.
//!
//! While nothing prints, the printer is asked for its status every
//! `heartbeat_interval` so a consumer can show cassette changes and faults.
//! Queries go through the [`ConnectionManager`] mutex, so a running job simply
//! delays the next beat.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::QueryResult;
use crate::connection::ConnectionManager;
use crate::usb::UsbHost;

async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Handle to a running heartbeat task. Dropping it stops the task.
pub struct StatusHeartbeat {
    latest: watch::Receiver<Option<QueryResult>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusHeartbeat {
    /// Spawn the heartbeat on the current tokio runtime.
    pub fn spawn<H: UsbHost>(manager: ConnectionManager<H>) -> Self {
        Self::spawn_with_token(manager, CancellationToken::new())
    }

    /// Spawn with a caller-owned token, e.g. a child of a shutdown token.
    pub fn spawn_with_token<H: UsbHost>(manager: ConnectionManager<H>, token: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(None);
        let interval = manager.timings().heartbeat_interval;
        let task = tokio::spawn(heartbeat_loop(manager, tx, token.clone(), interval));
        Self {
            latest: rx,
            token,
            task: Some(task),
        }
    }

    /// New receiver of every published result.
    pub fn subscribe(&self) -> watch::Receiver<Option<QueryResult>> {
        self.latest.clone()
    }

    /// Most recent result, `None` before the first beat.
    pub fn latest(&self) -> Option<QueryResult> {
        self.latest.borrow().clone()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Status heartbeat task failed: {e}");
            }
        }
    }
}

impl Drop for StatusHeartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn heartbeat_loop<H: UsbHost>(
    manager: ConnectionManager<H>,
    tx: watch::Sender<Option<QueryResult>>,
    token: CancellationToken,
    interval: Duration,
) {
    tracing::debug!(interval_ms = interval.as_millis() as u64, "Status heartbeat started");
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = manager.query() => result,
        };

        if let Err(e) = &result {
            tracing::debug!(error = %e, "Heartbeat query failed");
        }
        if tx.send(Some(result)).is_err() {
            // Every receiver is gone.
            break;
        }

        if sleep_or_cancel(&token, interval).await {
            break;
        }
    }
    tracing::debug!("Status heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PrinterTimings;
    use crate::protocol::status::status_record;
    use crate::testing::{FakeHost, test_device};
    use crate::{CommunicationError, LabelSize, QueryError};

    #[tokio::test(start_paused = true)]
    async fn publishes_connection_null_without_printer() {
        let host = FakeHost::new(vec![]);
        let mgr = ConnectionManager::new(host, PrinterTimings::default());
        let heartbeat = StatusHeartbeat::spawn(mgr);

        let mut rx = heartbeat.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow(),
            Some(Err(QueryError::Communication(CommunicationError::ConnectionNull)))
        );
        heartbeat.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn queries_on_every_interval() {
        let host = FakeHost::new(vec![test_device()]);
        let mgr = ConnectionManager::new(host.clone(), PrinterTimings::default());
        mgr.request_permission_and_open(&test_device()).await.unwrap();
        host.transport.push_status(status_record(12, 0, 0, 0));
        host.transport.push_status(status_record(24, 0, 0, 0));

        let heartbeat = StatusHeartbeat::spawn(mgr);
        let mut rx = heartbeat.subscribe();

        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone();
        assert_eq!(first.unwrap().unwrap().label_size, LabelSize::Mm12);

        let before = tokio::time::Instant::now();
        rx.changed().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(300));
        assert_eq!(heartbeat.latest().unwrap().unwrap().label_size, LabelSize::Mm24);

        heartbeat.stop().await;
        assert_eq!(host.transport.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_cancels_loop() {
        let host = FakeHost::new(vec![]);
        let mgr = ConnectionManager::new(host, PrinterTimings::default());
        let token = CancellationToken::new();
        let heartbeat = StatusHeartbeat::spawn_with_token(mgr, token.clone());

        drop(heartbeat);
        assert!(token.is_cancelled());
    }
}
