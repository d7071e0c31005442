use crate::config::parse_hhmm;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use std::future::Future;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

const RESCHEDULE_POLL_SECONDS: u64 = 30;

/// Run `task` once a day at the UTC time returned by `schedule_provider`.
///
/// The provider is re-read every poll so `config set rebuild.time` takes
/// effect without a restart; `None` pauses the job.
pub async fn run_daily_job<S, F, Fut>(name: &'static str, mut schedule_provider: S, mut task: F) -> Result<()>
where
    S: FnMut() -> Result<Option<String>>,
    F: FnMut(NaiveDate) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut last_logged = String::new();

    loop {
        let raw_time = match schedule_provider() {
            Ok(Some(value)) => value,
            Ok(None) => {
                sleep(Duration::from_secs(RESCHEDULE_POLL_SECONDS)).await;
                continue;
            }
            Err(error) => {
                error!(job = name, error = %error, "failed to load job schedule");
                sleep(Duration::from_secs(RESCHEDULE_POLL_SECONDS)).await;
                continue;
            }
        };

        let delay = match parse_hhmm(&raw_time).and_then(|time| delay_until(time, Utc::now())) {
            Ok(value) => value,
            Err(error) => {
                error!(job = name, error = %error, time = %raw_time, "invalid job time");
                sleep(Duration::from_secs(RESCHEDULE_POLL_SECONDS)).await;
                continue;
            }
        };

        if raw_time != last_logged {
            info!(job = name, seconds = delay.as_secs(), time_utc = %raw_time, "next run scheduled");
            last_logged = raw_time.clone();
        }

        if delay > Duration::from_secs(RESCHEDULE_POLL_SECONDS) {
            sleep(Duration::from_secs(RESCHEDULE_POLL_SECONDS)).await;
            continue;
        }

        sleep(delay).await;

        let date = Utc::now().date_naive();
        if let Err(error) = task(date).await {
            error!(job = name, error = %error, date = %date, "scheduled job failed");
        }

        sleep(Duration::from_secs(1)).await;
    }
}

/// Time from `now` until the next occurrence of `target` (UTC), strictly in
/// the future.
pub fn delay_until(target: NaiveTime, now: DateTime<Utc>) -> Result<Duration> {
    let today = now.date_naive().and_time(target).and_utc();
    let next_run = if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    };

    (next_run - now)
        .to_std()
        .context("Failed to compute next execution delay")
}
