use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use chatsync_api_client::Transport;

use crate::context::SessionContext;
use crate::sync::{HistorySyncEngine, SyncOutcome};

/// Running poll loop. Dropping the handle also ends the loop, but only
/// [`PollerHandle::stop`] cancels a round already in flight.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling now. A sync round in progress is cancelled; its
    /// response, if it still arrives, is never applied.
    pub fn stop(self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub fn spawn_poller<T: Transport>(
    ctx: Arc<SessionContext<T>>,
    engine: Arc<HistorySyncEngine>,
    every: Duration,
) -> PollerHandle {
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(run_poller(ctx, engine, every, rx));
    PollerHandle { shutdown, task }
}

/// Sync the selected chat every `every`. Ticks missed while a round is
/// running are skipped rather than bunched up.
async fn run_poller<T: Transport>(
    ctx: Arc<SessionContext<T>>,
    engine: Arc<HistorySyncEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("History polling started ({}ms)", every.as_millis());

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            outcome = engine.sync(&ctx) => match outcome {
                SyncOutcome::Applied(report) if report.changed_posts() => {
                    debug!(
                        "Poll applied {} new, {} updated, {} deleted",
                        report.inserted.len(),
                        report.updated.len(),
                        report.deleted.len()
                    );
                }
                SyncOutcome::Failed(e) => debug!("Poll failed: {e}"),
                _ => {}
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("History polling stopped");
}
