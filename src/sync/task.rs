use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    fetcher::AsyncChangeFetcher,
    poller_thread::{jitter, record_tick, PollerThreadConfig, SegmentSchedule},
    storage::Storage,
    Error, Result,
};

use super::{SyncState, SyncStatus, Synchronizer};

/// Periodic synchronization running as a task on the current tokio runtime.
///
/// Async counterpart of [`PollerThread`](crate::poller_thread::PollerThread).
pub struct SyncTask {
    join_handle: JoinHandle<()>,
    stop_sender: watch::Sender<bool>,
    status: Arc<SyncStatus>,
}

impl SyncTask {
    /// Spawn the task. Must be called from within a tokio runtime.
    pub fn start<F>(fetcher: F, storage: Arc<Storage>, config: PollerThreadConfig) -> SyncTask
    where
        F: AsyncChangeFetcher + Send + 'static,
    {
        let (stop_sender, stop_receiver) = watch::channel(false);
        let status = Arc::new(SyncStatus::default());
        status.set_state(SyncState::Syncing);

        let join_handle = tokio::spawn(run(
            fetcher,
            Synchronizer::new(storage),
            config,
            Arc::clone(&status),
            stop_receiver,
        ));

        SyncTask {
            join_handle,
            stop_sender,
            status,
        }
    }

    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    /// Wait for the first synchronization.
    pub async fn ready(&self) -> Result<()> {
        self.status.ready().await
    }

    /// Signal the task to stop without waiting for it.
    pub fn stop(&self) {
        // Fails only if the task already exited.
        let _ = self.stop_sender.send(true);
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .await
            .map_err(|_| Error::PollerThreadPanicked)
    }
}

async fn run<F: AsyncChangeFetcher>(
    mut fetcher: F,
    synchronizer: Synchronizer,
    config: PollerThreadConfig,
    status: Arc<SyncStatus>,
    mut stop: watch::Receiver<bool>,
) {
    let mut segments = SegmentSchedule::new(config.segments_interval);
    loop {
        log::debug!(target: "splitio", "synchronizing storage");
        let all_segments = segments.is_due();
        let result = synchronizer.sync_all_async(&mut fetcher, all_segments).await;
        if all_segments && result.is_ok() {
            segments.refreshed();
        }
        if !record_tick(&status, result) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(jitter(config.interval, config.jitter)) => {}
            _ = stop.changed() => {
                // Also fires when the sender is dropped.
                log::debug!(target: "splitio", "sync task received stop command");
                status.set_state(SyncState::Disabled);
                return;
            }
        }
    }
}
