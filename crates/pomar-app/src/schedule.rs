//! Daily janitor schedule.
//!
//! The sweep fires at 02:00 UTC. The task computes the duration until the
//! next occurrence, sleeps, runs the cleanup through the store handle, and
//! repeats; failures are logged and never kill the schedule.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use pomar_store::TaskStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SWEEP_HOUR: u32 = 2;

/// Duration from `now` until the next 02:00 UTC.
fn until_next_sweep(now: DateTime<Utc>) -> Duration {
    let today_sweep = now
        .with_hour(SWEEP_HOUR)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let next = if now < today_sweep {
        today_sweep
    } else {
        today_sweep + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// Spawn the recurring janitor task.
pub(crate) fn spawn_janitor_schedule(store: TaskStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_sweep(Utc::now());
            info!(in_secs = wait.as_secs(), "next cleanup sweep scheduled");
            tokio::time::sleep(wait).await;
            match store.run_cleanup().await {
                Ok(report) => info!(
                    removed_by_age = report.removed_by_age,
                    removed_by_quota = report.removed_by_quota,
                    orphans_deleted = report.orphans_deleted,
                    total_size_mb = report.total_size_mb,
                    "scheduled cleanup finished"
                ),
                Err(err) => warn!(error = %err, "scheduled cleanup failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sweep_later_today_when_before_two() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 30, 0).unwrap();
        assert_eq!(until_next_sweep(now), Duration::from_secs(90 * 60));
    }

    #[test]
    fn sweep_tomorrow_when_past_two() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 1).unwrap();
        assert_eq!(
            until_next_sweep(now),
            Duration::from_secs(24 * 60 * 60 - 1)
        );
    }

    #[test]
    fn sweep_exactly_at_two_waits_a_day() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        assert_eq!(until_next_sweep(now), Duration::from_secs(24 * 60 * 60));
    }
}
