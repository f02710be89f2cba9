//! Periodic idle-session reclamation.

use crate::services::upload_service::UploadService;
use chrono::Utc;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

/// Run [`UploadService::sweep_idle`] every `period` until the task is aborted.
pub fn spawn_sweeper(service: UploadService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match service.sweep_idle(Utc::now()).await {
                Ok(report) if report.sessions_removed + report.orphans_removed > 0 => {
                    info!(
                        "Idle sweep removed {} sessions, {} chunk files, {} orphans",
                        report.sessions_removed,
                        report.chunk_files_removed,
                        report.orphans_removed
                    );
                }
                Ok(_) => {}
                Err(err) => error!("Idle sweep failed: {}", err),
            }
        }
    })
}
