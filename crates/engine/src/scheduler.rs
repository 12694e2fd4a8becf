use crate::orchestrator::RunOrchestrator;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use core_types::calendar::local_date;

/// The first instant after `now` at which the wall clock in `tz` reads `hour:minute`.
///
/// A time that falls into a DST gap runs an hour later on that day.
pub fn next_run_after(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = local_date(now, tz);
    (0..3)
        .filter_map(|offset| today.checked_add_days(chrono::Days::new(offset)))
        .filter_map(|date| local_run_time(date, tz, hour, minute))
        .find(|at| *at > now)
        .unwrap_or(now + Duration::days(1))
}

fn local_run_time(date: NaiveDate, tz: Tz, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|at| at.with_timezone(&Utc))
}

/// Runs the orchestrator once a day at `hour:minute` local time, forever.
///
/// A failed run is logged and the loop waits for the next slot.
pub async fn run_daily(orchestrator: &RunOrchestrator, tz: Tz, hour: u32, minute: u32) {
    loop {
        let now = Utc::now();
        let next = next_run_after(now, tz, hour, minute);
        tracing::info!(next_run = %next.with_timezone(&tz), "Waiting for the next scheduled run.");
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

        let today = local_date(Utc::now(), tz);
        match orchestrator.run(today).await {
            Ok(summary) => tracing::info!(
                run_id = %summary.run_id,
                anomalies = summary.flagged_count(),
                "Scheduled run complete."
            ),
            Err(e) => tracing::error!(error = %e, "Scheduled run failed."),
        }
    }
}
