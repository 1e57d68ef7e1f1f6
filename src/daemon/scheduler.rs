//! Daily scheduled generation.

use crate::config::PodcastConfig;
use crate::error::Result;
use crate::pipeline::orchestrator::Orchestrator;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Next occurrence of `hour:minute` UTC strictly after `now`.
pub fn next_run(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Start one timer task per scheduled podcast.
pub fn spawn_all(
    orchestrator: &Arc<Orchestrator>,
    podcasts: &[PodcastConfig],
) -> Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();
    for podcast in podcasts {
        let Some((hour, minute)) = podcast.schedule_time()? else {
            continue;
        };
        info!(podcast_id = %podcast.id, hour, minute, "Daily generation scheduled (UTC)");
        let orchestrator = Arc::clone(orchestrator);
        let podcast_id = podcast.id.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let wait = (next_run(now, hour, minute) - now)
                    .to_std()
                    .unwrap_or_default();
                tokio::time::sleep(wait).await;
                fire(&orchestrator, &podcast_id);
            }
        }));
    }
    Ok(tasks)
}

/// Start a scheduled run unless the podcast already has one in flight.
pub fn fire(orchestrator: &Arc<Orchestrator>, podcast_id: &str) {
    if orchestrator.is_podcast_running(podcast_id) {
        warn!(podcast_id, "Scheduled run skipped: a run is already active");
        return;
    }
    match orchestrator.generate(podcast_id) {
        Ok(handle) => info!(podcast_id, episode_id = handle.episode_id(), "Scheduled run started"),
        Err(e) => error!(podcast_id, error = %e, "Scheduled run could not start"),
    }
}
