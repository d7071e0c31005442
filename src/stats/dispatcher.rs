use crate::config::Config;
use crate::db::Database;
use crate::stats::apply_progress_event;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainSummary {
    pub applied: usize,
    pub failed: usize,
}

/// Apply up to `batch_size` pending events. An event is marked processed only
/// after both aggregate updates succeeded; failures stay pending.
pub fn drain_pending(database: &mut Database, batch_size: usize, placeholder_name: &str) -> Result<DrainSummary> {
    let mut summary = DrainSummary::default();

    for event in database.dispatchable_events(batch_size)? {
        let now = Utc::now();
        match apply_progress_event(database, &event, placeholder_name, now) {
            Ok(outcome) => {
                debug!(
                    event_id = event.id,
                    user_updated = outcome.user_updated,
                    duplicate = outcome.duplicate,
                    book_recomputed = outcome.book_recomputed,
                    "progress event applied"
                );
                database.mark_event_processed(event.id, now)?;
                summary.applied += 1;
            }
            Err(error) => {
                warn!(
                    event_id = event.id,
                    record_id = event.record_id,
                    attempts = event.attempts + 1,
                    created_at = %event.created_at,
                    error = %error,
                    "progress event failed; left pending"
                );
                database.mark_event_failed(event.id, &format!("{error:#}"))?;
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Drain until the feed is empty or a pass makes no progress.
pub fn drain_all(database: &mut Database, batch_size: usize, placeholder_name: &str) -> Result<DrainSummary> {
    let mut total = DrainSummary::default();

    loop {
        let pass = drain_pending(database, batch_size, placeholder_name)?;
        total.applied += pass.applied;
        total.failed += pass.failed;

        if pass.applied == 0 || pass.applied + pass.failed < batch_size {
            return Ok(total);
        }
    }
}

pub async fn run_event_dispatcher(config: Arc<Config>, wake: Arc<Notify>) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(config.dispatch_interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_seconds = config.dispatch_interval_seconds,
        batch_size = config.dispatch_batch_size,
        "progress event dispatcher started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        let drained = Database::open(&config.db_path)
            .and_then(|mut database| {
                let summary = drain_all(&mut database, config.dispatch_batch_size, &config.default_display_name)?;
                let threshold = Utc::now() - ChronoDuration::days(i64::from(config.retention_days));
                let purged = database.purge_processed_events(threshold)?;
                Ok((summary, purged))
            })
            .map_err(|error| {
                error!(error = %error, "failed to drain progress events");
                error
            });

        if let Ok((summary, purged)) = drained {
            if summary.applied > 0 || summary.failed > 0 || purged > 0 {
                info!(
                    applied = summary.applied,
                    failed = summary.failed,
                    purged,
                    "progress events dispatched"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressStatus, ProgressUpdate, record_progress, remove_progress};
    use tempfile::tempdir;

    fn update(status: ProgressStatus) -> ProgressUpdate {
        ProgressUpdate {
            status,
            percent_complete: None,
            privacy: None,
        }
    }

    #[test]
    fn drain_processes_one_event_per_record_per_pass() {
        let dir = tempdir().unwrap();
        let mut database = Database::open(&dir.path().join("shelf.db")).unwrap();
        let now = Utc::now();

        record_progress(&mut database, "u1", 7, &update(ProgressStatus::Reading), now).unwrap();
        record_progress(&mut database, "u1", 7, &update(ProgressStatus::Finished), now).unwrap();
        record_progress(&mut database, "u2", 7, &update(ProgressStatus::Finished), now).unwrap();

        let first = drain_pending(&mut database, 10, "Reader").unwrap();
        assert_eq!(first, DrainSummary { applied: 2, failed: 0 });
        assert_eq!(database.pending_event_count().unwrap(), 1);

        let rest = drain_all(&mut database, 10, "Reader").unwrap();
        assert_eq!(rest.applied, 1);
        assert_eq!(database.pending_event_count().unwrap(), 0);

        let book = database.book_stats(7).unwrap().unwrap();
        assert_eq!((book.finished_readers, book.reader_count), (2, 2));
        assert_eq!(database.user_stats("u1").unwrap().unwrap().finished_count, 1);
    }

    #[test]
    fn drain_all_pages_through_small_batches() {
        let dir = tempdir().unwrap();
        let mut database = Database::open(&dir.path().join("shelf.db")).unwrap();
        let now = Utc::now();

        for book in 1..=5 {
            record_progress(&mut database, "u1", book, &update(ProgressStatus::Finished), now).unwrap();
        }
        remove_progress(&mut database, "u1", 3, now).unwrap();

        let summary = drain_all(&mut database, 2, "Reader").unwrap();
        assert_eq!(summary.applied, 6);
        assert_eq!(database.user_stats("u1").unwrap().unwrap().finished_count, 4);
        assert!(database.last_processed_at().unwrap().is_some());
    }

    #[test]
    fn malformed_event_holds_back_only_its_own_pair() {
        let dir = tempdir().unwrap();
        let mut database = Database::open(&dir.path().join("shelf.db")).unwrap();
        let now = Utc::now();

        let broken = record_progress(&mut database, "u1", 1, &update(ProgressStatus::Finished), now).unwrap();
        database
            .connection()
            .execute(
                "UPDATE progress_events SET after_json = '{bad' WHERE id = ?1",
                [broken.event_id],
            )
            .unwrap();
        let good = record_progress(&mut database, "u2", 2, &update(ProgressStatus::Finished), now).unwrap();

        let events = database.dispatchable_events(10).unwrap();
        assert_eq!(events.iter().map(|event| event.id).collect::<Vec<_>>(), vec![good.event_id]);

        let (attempts, last_error): (i64, Option<String>) = database
            .connection()
            .query_row(
                "SELECT attempts, last_error FROM progress_events WHERE id = ?1",
                [broken.event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(attempts, 1);
        assert!(last_error.is_some());

        let summary = drain_all(&mut database, 10, "Reader").unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(database.pending_event_count().unwrap(), 1);
        assert_eq!(database.user_stats("u2").unwrap().unwrap().finished_count, 1);
        assert!(database.user_stats("u1").unwrap().is_none());
    }

    #[test]
    fn purge_drops_old_processed_events_only() {
        let dir = tempdir().unwrap();
        let mut database = Database::open(&dir.path().join("shelf.db")).unwrap();
        let now = Utc::now();

        record_progress(&mut database, "u1", 1, &update(ProgressStatus::Reading), now).unwrap();
        drain_all(&mut database, 10, "Reader").unwrap();
        record_progress(&mut database, "u1", 2, &update(ProgressStatus::Reading), now).unwrap();

        let purged = database
            .purge_processed_events(Utc::now() + ChronoDuration::seconds(1))
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(database.pending_event_count().unwrap(), 1);
    }
}
