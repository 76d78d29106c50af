//! A background poller thread that periodically synchronizes storage with the server.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc},
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use crate::{
    fetcher::ChangeFetcher,
    storage::Storage,
    sync::{SyncState, SyncStatus, Synchronizer},
    Error, Result,
};

/// Configuration for [`PollerThread`] and [`SyncTask`](crate::sync::SyncTask).
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between flag synchronizations.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between requests. This helps to avoid
    /// multiple server instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
    /// Minimum interval between refreshes of already known segments. Newly referenced segments
    /// are always fetched right away.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_SEGMENTS_INTERVAL`].
    pub segments_interval: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);
    /// Default value for [`PollerThreadConfig::segments_interval`].
    pub const DEFAULT_SEGMENTS_INTERVAL: Duration = Duration::from_secs(60);

    /// Create a new `PollerThreadConfig` using default configuration.
    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }

    pub fn with_segments_interval(mut self, segments_interval: Duration) -> PollerThreadConfig {
        self.segments_interval = segments_interval;
        self
    }
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
            segments_interval: PollerThreadConfig::DEFAULT_SEGMENTS_INTERVAL,
        }
    }
}

/// Decides when known segments are due for a refresh.
pub(crate) struct SegmentSchedule {
    interval: Duration,
    last_refresh: Option<Instant>,
}

impl SegmentSchedule {
    pub(crate) fn new(interval: Duration) -> SegmentSchedule {
        SegmentSchedule {
            interval,
            last_refresh: None,
        }
    }

    pub(crate) fn is_due(&self) -> bool {
        self.last_refresh
            .map_or(true, |last| last.elapsed() >= self.interval)
    }

    pub(crate) fn refreshed(&mut self) {
        self.last_refresh = Some(Instant::now());
    }
}

/// Record the outcome of one tick in `status`. Returns `false` if polling must stop.
pub(crate) fn record_tick(status: &SyncStatus, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            status.set_state(SyncState::Ready);
            true
        }
        Err(err) if err.is_unrecoverable() => {
            log::warn!(target: "splitio", "stopping synchronization: {err}");
            status.fail(err);
            false
        }
        Err(err) => {
            // Other errors are retriable. Keep serving the last known good data.
            log::warn!(target: "splitio", "synchronization failed, will retry: {err}");
            true
        }
    }
}

/// A storage poller thread.
///
/// The poller thread polls the server periodically using a [`ChangeFetcher`] and applies the
/// changes to [`Storage`].
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    status: Arc<SyncStatus>,
}

impl PollerThread {
    /// Starts the poller thread.
    ///
    /// # Errors
    ///
    /// This method can return the following errors:
    /// - IO Error if poller thread failed to start.
    pub fn start<F>(fetcher: F, storage: Arc<Storage>) -> std::io::Result<PollerThread>
    where
        F: ChangeFetcher + Send + 'static,
    {
        PollerThread::start_with_config(fetcher, storage, PollerThreadConfig::default())
    }

    /// Starts the poller thread with the provided configuration.
    pub fn start_with_config<F>(
        mut fetcher: F,
        storage: Arc<Storage>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread>
    where
        F: ChangeFetcher + Send + 'static,
    {
        // Using `sync_channel` here as it makes `stop_sender` `Sync` (shareable between
        // threads). Buffer size of 1 should be enough for our use case as we're sending a stop
        // command, and we can simply `try_send()` and ignore if the buffer is full (another thread
        // has sent a stop command already).
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let status = Arc::new(SyncStatus::default());
        status.set_state(SyncState::Syncing);

        let join_handle = {
            let status = Arc::clone(&status);
            let synchronizer = Synchronizer::new(storage);
            let mut segments = SegmentSchedule::new(config.segments_interval);

            std::thread::Builder::new()
                .name("splitio-poller".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        loop {
                            log::debug!(target: "splitio", "synchronizing storage");
                            let all_segments = segments.is_due();
                            let result = synchronizer.sync_all(&mut fetcher, all_segments);
                            if all_segments && result.is_ok() {
                                segments.refreshed();
                            }
                            if !record_tick(&status, result) {
                                return;
                            }

                            let timeout = jitter(config.interval, config.jitter);
                            match stop_receiver.recv_timeout(timeout) {
                                Err(RecvTimeoutError::Timeout) => {
                                    // Timed out. Loop back to synchronize again.
                                }
                                Ok(()) => {
                                    log::debug!(target: "splitio", "poller thread received stop command");
                                    status.set_state(SyncState::Disabled);
                                    return;
                                }
                                Err(RecvTimeoutError::Disconnected) => {
                                    // When the other end of channel disconnects, calls to
                                    // .recv_timeout() return immediately.
                                    log::debug!(target: "splitio", "poller thread received disconnected");
                                    status.set_state(SyncState::Disabled);
                                    return;
                                }
                            }
                        }
                    }));

                    // If catch_unwind returns Err, it means a panic occurred.
                    if let Err(_panic_info) = result {
                        status.fail(Error::PollerThreadPanicked);
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            status,
        })
    }

    /// Synchronization state shared with the thread.
    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    /// Waits for the first synchronization.
    ///
    /// # Errors
    ///
    /// This method can fail with the following errors:
    ///
    /// - [`Error::PollerThreadPanicked`]
    /// - [`Error::Unauthorized`]
    /// - [`Error::InvalidBaseUrl`]
    pub fn wait_until_ready(&self) -> Result<()> {
        self.status.wait_until_ready()
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the channel buffer is
        // full. Both cases mean the thread is stopped or is about to stop.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`PollerThread::stop`] instead.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
pub(crate) fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
