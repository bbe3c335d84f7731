use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::Coordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    pub interval: Duration,
    /// Members silent for longer than this are evicted.
    pub heartbeat_timeout: Duration,
    /// Empty rooms untouched for longer than this are closed.
    pub room_inactivity: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            room_inactivity: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rooms: usize,
    pub evicted: usize,
    pub closed: usize,
    pub failed: usize,
}

/// Turns missed heartbeats and idle rooms into leaves and closures, using the
/// same room paths as explicit requests.
pub struct Reaper {
    coordinator: Arc<Coordinator>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(coordinator: Arc<Coordinator>, config: ReaperConfig) -> Self {
        Self { coordinator, config }
    }

    /// Sweeps every tracked room concurrently. A room that fails is logged
    /// and counted; its deferred writes are retried on the next sweep.
    pub async fn sweep(&self, now: OffsetDateTime) -> SweepReport {
        let room_ids = self.coordinator.room_ids();
        let sweeps = join_all(
            room_ids
                .iter()
                .map(|room_id| self.coordinator.sweep_room(room_id, now, &self.config)),
        )
        .await;

        let mut report = SweepReport { rooms: room_ids.len(), ..SweepReport::default() };
        for (room_id, sweep) in room_ids.iter().zip(sweeps) {
            match sweep {
                Ok(sweep) => {
                    report.evicted += sweep.evicted.len();
                    report.closed += usize::from(sweep.closed);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(%room_id, %err, "room sweep failed; retrying next tick");
                }
            }
        }
        report
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?self.config.interval, "presence reaper started");
            loop {
                ticker.tick().await;
                let report = self.sweep(OffsetDateTime::now_utc()).await;
                if report.evicted + report.closed + report.failed > 0 {
                    info!(?report, "presence sweep");
                } else {
                    debug!(rooms = report.rooms, "presence sweep");
                }
            }
        })
    }
}
