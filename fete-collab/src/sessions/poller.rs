use std::{sync::Arc, time::Duration};

use log::{debug, error, info};
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::{CollabContext, CollabResult, QueueEngine, SharedDatabase};

/// Keeps the queues of active sessions in sync with what their owners are playing
pub struct SessionPoller {
    database: SharedDatabase,
    queue: Arc<QueueEngine>,
    interval: Duration,
}

impl SessionPoller {
    pub fn new(context: &CollabContext, queue: &Arc<QueueEngine>) -> Self {
        Self {
            database: context.database.clone(),
            queue: queue.clone(),
            interval: context.config.poll_interval,
        }
    }

    /// Polls until the shutdown signal becomes true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Polling sessions every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Failed to poll sessions: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Session poller stopped");
    }

    /// Advances every active session once. Returns how many sessions were advanced.
    pub async fn poll_once(&self) -> CollabResult<usize> {
        let sessions = self.database.list_active_sessions().await?;
        let mut advanced = 0;

        for session in sessions {
            match self.queue.advance_queue(&session).await {
                Ok(report) => {
                    advanced += 1;

                    if let Some(now_playing) = report.now_playing {
                        debug!("Session {} is playing {}", session.id, now_playing.track_id);
                    }
                }
                Err(e) => error!("Failed to advance session {}: {}", session.id, e),
            }
        }

        Ok(advanced)
    }
}
