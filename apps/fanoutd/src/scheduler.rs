//! Future-dated emits. One poller task scans the metastore; firing a row
//! is the same publish path as a live emit, with the schedule id as the
//! dedup key so a duplicate poll cannot double-append.

use fanout_metastore::ScheduledEmit;
use fanout_telemetry::{TelemetryLabels, record_counter};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::state::AppState;

const POLL_BATCH: usize = 64;

pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = state.shutdown.clone();
        let mut tick = tokio::time::interval(state.config.schedule_poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => poll_once(&state).await,
                _ = shutdown.changed() => break,
            }
        }
        info!("scheduler stopped");
    })
}

async fn poll_once(state: &AppState) {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let due = match state.meta.due_schedules(now, POLL_BATCH).await {
        Ok(due) => due,
        Err(err) => {
            error!(error = %err, "schedule poll failed");
            return;
        }
    };
    for row in due {
        fire(state, &row).await;
    }
}

/// Fires one pending schedule: emit, then flip the row under its status
/// guard. `run-now` shares this path.
pub async fn fire(state: &AppState, row: &ScheduledEmit) {
    let dedup = format!("sch:{}", row.id);
    match state
        .publisher
        .emit(
            &row.org_id,
            &row.project_id,
            &row.topic,
            row.payload.clone(),
            Some(&dedup),
        )
        .await
    {
        Ok(emitted) => {
            match state
                .meta
                .mark_schedule_completed(&row.id, &emitted.id)
                .await
            {
                Ok(true) => {
                    record_counter(
                        "schedules_fired",
                        1,
                        &TelemetryLabels::tenant(&row.org_id).with_topic(&row.topic),
                    );
                    info!(
                        schedule = %row.id,
                        event = %emitted.id,
                        org = %row.org_id,
                        "schedule fired"
                    );
                }
                Ok(false) => warn!(
                    schedule = %row.id,
                    "schedule no longer pending after emit (lost race)"
                ),
                Err(err) => error!(schedule = %row.id, error = %err, "failed to mark completed"),
            }
        }
        Err(err) => {
            warn!(schedule = %row.id, error = %err, "schedule emit failed");
            if let Err(mark_err) = state
                .meta
                .mark_schedule_failed(&row.id, &err.to_string())
                .await
            {
                error!(schedule = %row.id, error = %mark_err, "failed to mark failed");
            }
        }
    }
}
