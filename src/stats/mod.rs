pub mod dispatcher;
pub mod transition;

use crate::db::Database;
use crate::db::progress::{finished_records_for_user, pending_event_ids_for_user, records_for_book};
use crate::db::stats::{
    is_applied, load_profile, load_user_stats, mark_applied, save_book_stats, save_user_stats,
};
use crate::progress::{ProgressEvent, ProgressRecord, ProgressStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-user reading totals plus the denormalized profile fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub user_id: String,
    pub finished_count: i64,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub display_name: String,
    pub photo_url: Option<String>,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

/// Per-book reader counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStats {
    pub book_id: i64,
    pub active_readers: i64,
    pub finished_readers: i64,
    pub reader_count: i64,
    #[serde(skip_serializing)]
    pub sum_percent: f64,
    pub avg_percent: f64,
    #[serde(skip_serializing)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOutcome {
    pub user_updated: bool,
    pub duplicate: bool,
    pub book_recomputed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildSummary {
    pub users: usize,
    pub books: usize,
}

pub fn user_aggregate(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Fold one change event into the user and book aggregates.
///
/// The user step is guarded by an applied marker so redelivery never counts
/// twice. The book step recounts from the progress records, which makes it
/// safe to repeat.
pub fn apply_progress_event(
    database: &mut Database,
    event: &ProgressEvent,
    placeholder_name: &str,
    now: DateTime<Utc>,
) -> Result<EventOutcome> {
    let (Some(user_id), Some(book_id)) = (event.user_id(), event.book_id()) else {
        warn!(event_id = event.id, "Progress event carries no snapshot; skipping");
        return Ok(EventOutcome::default());
    };

    let plan = transition::plan(event.before.as_ref(), event.after.as_ref());
    let aggregate = user_aggregate(user_id);

    let user_updated = database.immediate(|transaction| {
        if is_applied(transaction, event.id, &aggregate)? {
            return Ok(false);
        }

        let mut stats = match load_user_stats(transaction, user_id)? {
            Some(stats) => stats,
            None => initial_user_stats(transaction, user_id, placeholder_name, now),
        };

        stats.finished_count = (stats.finished_count + plan.finished_delta).max(0);
        if plan.set_last_finished {
            // Events for different books may arrive out of order.
            let candidate = event
                .after
                .as_ref()
                .map(|after| after.finished_at.unwrap_or(after.updated_at));
            stats.last_finished_at = stats.last_finished_at.max(candidate);
        }
        stats.updated_at = now;

        save_user_stats(transaction, &stats)?;
        mark_applied(transaction, event.id, &aggregate, now)?;
        Ok(true)
    })?;

    if !user_updated {
        debug!(event_id = event.id, user_id, "User aggregate already has this event");
    }

    let book_recomputed = plan.touches_book();
    if book_recomputed {
        database.immediate(|transaction| recount_book(transaction, book_id, now))?;
    }

    Ok(EventOutcome {
        user_updated,
        duplicate: !user_updated,
        book_recomputed,
    })
}

/// Pure per-book tally over the current progress records.
pub fn tally(book_id: i64, records: &[ProgressRecord], now: DateTime<Utc>) -> BookStats {
    let count_status = |status: ProgressStatus| {
        records
            .iter()
            .filter(|record| record.state.status == status)
            .count() as i64
    };

    let reader_count = records.len() as i64;
    let sum_percent = records
        .iter()
        .filter_map(|record| record.state.percent_complete)
        .filter(|percent| percent.is_finite())
        .sum::<f64>();
    let avg_percent = if reader_count > 0 {
        round2(sum_percent / reader_count as f64)
    } else {
        0.0
    };

    BookStats {
        book_id,
        active_readers: count_status(ProgressStatus::Reading),
        finished_readers: count_status(ProgressStatus::Finished),
        reader_count,
        sum_percent,
        avg_percent,
        updated_at: now,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn recompute_book_stats(database: &mut Database, book_id: i64, now: DateTime<Utc>) -> Result<BookStats> {
    database.immediate(|transaction| recount_book(transaction, book_id, now))
}

/// Rebuild one user's aggregate from the progress records.
///
/// Pending events of that user are marked applied for the user aggregate in
/// the same transaction: their effects are already visible in the records.
pub fn recompute_user_stats(
    database: &mut Database,
    user_id: &str,
    placeholder_name: &str,
    now: DateTime<Utc>,
) -> Result<UserStats> {
    database.immediate(|transaction| {
        let (finished_count, last_finished_at) = finished_records_for_user(transaction, user_id)?;

        let mut stats = match load_user_stats(transaction, user_id)? {
            Some(stats) => stats,
            None => initial_user_stats(transaction, user_id, placeholder_name, now),
        };
        stats.finished_count = finished_count;
        stats.last_finished_at = last_finished_at;
        stats.updated_at = now;
        save_user_stats(transaction, &stats)?;

        let aggregate = user_aggregate(user_id);
        for event_id in pending_event_ids_for_user(transaction, user_id)? {
            mark_applied(transaction, event_id, &aggregate, now)?;
        }

        Ok(stats)
    })
}

pub fn rebuild_all(database: &mut Database, placeholder_name: &str, now: DateTime<Utc>) -> Result<RebuildSummary> {
    let users = database.known_user_ids()?;
    for user_id in &users {
        recompute_user_stats(database, user_id, placeholder_name, now)?;
    }

    let books = database.known_book_ids()?;
    for book_id in &books {
        recompute_book_stats(database, *book_id, now)?;
    }

    Ok(RebuildSummary {
        users: users.len(),
        books: books.len(),
    })
}

fn recount_book(conn: &Connection, book_id: i64, now: DateTime<Utc>) -> Result<BookStats> {
    let records = records_for_book(conn, book_id)?;
    let stats = tally(book_id, &records, now);
    save_book_stats(conn, &stats)?;
    Ok(stats)
}

/// Fresh zeroed aggregate; the profile copy is best-effort.
fn initial_user_stats(
    conn: &Connection,
    user_id: &str,
    placeholder_name: &str,
    now: DateTime<Utc>,
) -> UserStats {
    let profile = load_profile(conn, user_id).unwrap_or_else(|error| {
        warn!(user_id, error = %error, "Failed to read profile; using placeholder name");
        None
    });

    let (display_name, photo_url) = match profile {
        Some(profile) => (profile.display_name, profile.photo_url),
        None => (placeholder_name.to_string(), None),
    };

    UserStats {
        user_id: user_id.to_string(),
        finished_count: 0,
        last_finished_at: None,
        display_name,
        photo_url,
        updated_at: now,
    }
}
