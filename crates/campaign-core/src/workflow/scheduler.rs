//! Periodic monitoring scheduler
//!
//! Each tick enqueues monitoring tasks for the configured campaigns, drains
//! the due part of the queue and moves finished workflows into history.

use super::coordinator::{Coordinator, QueueRunSummary};
use crate::config::CampaignConfig;
use campaign_types::CampaignId;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// What one scheduler tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub scheduled: usize,
    pub queue: QueueRunSummary,
    pub cleaned_up: usize,
}

pub struct MonitoringScheduler {
    coordinator: Arc<Coordinator>,
    campaign_ids: Vec<CampaignId>,
    interval: Duration,
}

impl MonitoringScheduler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        campaign_ids: Vec<CampaignId>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            campaign_ids,
            interval,
        }
    }

    pub fn from_config(coordinator: Arc<Coordinator>, config: &CampaignConfig) -> Self {
        Self::new(
            coordinator,
            config.scheduled_campaigns(),
            Duration::from_secs(config.scheduler.interval_seconds),
        )
    }

    pub async fn tick(&self) -> TickReport {
        let scheduled = self.coordinator.schedule_monitoring(&self.campaign_ids).await.len();
        let queue = self.coordinator.process_task_queue().await;
        let cleaned_up = self.coordinator.cleanup_completed().await;

        debug!(
            "Scheduler tick: {} scheduled, {} started, {} rescheduled, {} dropped",
            scheduled, queue.started, queue.rescheduled, queue.dropped
        );
        TickReport {
            scheduled,
            queue,
            cleaned_up,
        }
    }

    /// Tick until `shutdown` becomes true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting monitoring scheduler for {} campaigns every {:?}",
            self.campaign_ids.len(),
            self.interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Monitoring scheduler stopped");
    }
}
