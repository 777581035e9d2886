//! Background worker for periodic queue draining.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connectivity::{ConnectivityFlag, ConnectivityState};
use crate::data_store::DataStore;
use crate::replay::SyncReport;

const MAX_BACKOFF: Duration = Duration::from_secs(300);
const EVENT_CAPACITY: usize = 64;

/// Lifecycle and progress notifications of a [`SyncWorker`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum SyncEvent {
    Started,
    Online,
    Offline,
    Completed(SyncReport),
    Failed(String),
    Stopped,
}

/// Background sync worker.
///
/// On every tick it probes `/health`, updates the connectivity flag and, while
/// online with pending items, drains the queue. Consecutive failed drains back
/// off exponentially (capped at five minutes); a reconnect resets the backoff.
///
/// `connectivity` must be the flag the data store's API client reads.
pub struct SyncWorker {
    data_store: DataStore,
    connectivity: ConnectivityFlag,
    interval: Duration,
    events: broadcast::Sender<SyncEvent>,
}

/// Handle to a running worker.
pub struct SyncWorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "background sync worker panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl SyncWorker {
    pub fn new(data_store: DataStore, connectivity: ConnectivityFlag, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            data_store,
            connectivity,
            interval,
            events,
        }
    }

    /// Subscribe to worker events. Subscribe before [`start`](Self::start) to
    /// observe `Started`.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Spawn the worker loop.
    pub fn start(self) -> SyncWorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let join = tokio::spawn(async move { self.run(signal).await });
        SyncWorkerHandle { shutdown, join }
    }

    async fn run(self, shutdown: Arc<Notify>) {
        tracing::info!(interval = ?self.interval, "background sync worker started");
        self.emit(SyncEvent::Started);

        if let Err(err) = self.data_store.queue().requeue_processing().await {
            tracing::warn!(error = %err, "failed to requeue interrupted items");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut consecutive_failures = 0u32;
        let mut resume_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("background sync worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let (online, reconnected) = self.probe().await;
                    if !online {
                        continue;
                    }

                    if reconnected {
                        consecutive_failures = 0;
                        resume_at = None;
                    }
                    if resume_at.is_some_and(|at| Instant::now() < at) {
                        tracing::debug!("backing off; skipping sync");
                        continue;
                    }

                    match self.sync_once().await {
                        Ok(None) => {}
                        Ok(Some(report)) => {
                            if report.is_clean() || report.skipped {
                                consecutive_failures = 0;
                                resume_at = None;
                            } else {
                                consecutive_failures += 1;
                                resume_at = Some(Instant::now() + self.backoff(consecutive_failures));
                            }
                            self.emit(SyncEvent::Completed(report));
                        }
                        Err(err) => {
                            consecutive_failures += 1;
                            let backoff = self.backoff(consecutive_failures);
                            tracing::warn!(
                                failures = consecutive_failures,
                                ?backoff,
                                error = %err,
                                "background sync failed"
                            );
                            resume_at = Some(Instant::now() + backoff);
                            self.emit(SyncEvent::Failed(err));
                        }
                    }
                }
            }
        }

        self.emit(SyncEvent::Stopped);
        tracing::info!("background sync worker stopped");
    }

    /// Probe the backend and update the flag. Returns `(online, reconnected)`.
    async fn probe(&self) -> (bool, bool) {
        let online = self.data_store.api().check_connectivity().await;
        let state = ConnectivityState::from_online(online);
        let previous = self.connectivity.set(state);

        if previous != state {
            tracing::info!(?state, "connectivity changed");
            self.emit(match state {
                ConnectivityState::Online => SyncEvent::Online,
                ConnectivityState::Offline => SyncEvent::Offline,
            });
        }

        (online, online && previous == ConnectivityState::Offline)
    }

    /// Drain if anything is pending.
    async fn sync_once(&self) -> Result<Option<SyncReport>, String> {
        let stats = self
            .data_store
            .queue()
            .stats()
            .await
            .map_err(|e| e.to_string())?;
        if stats.pending == 0 {
            tracing::debug!("no pending items");
            return Ok(None);
        }

        tracing::debug!(pending = stats.pending, "syncing pending items");
        self.data_store
            .sync_pending()
            .await
            .map(Some)
            .map_err(|e| e.to_string())
    }

    fn backoff(&self, failures: u32) -> Duration {
        self.interval
            .checked_mul(1u32 << failures.min(5))
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}
