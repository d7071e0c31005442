use super::{Database, from_millis, to_millis};
use crate::progress::{Privacy, ProgressEvent, ProgressRecord, ProgressSnapshot, ProgressStatus};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::warn;

/// Outcome of one progress write: the record it touched and the event it raised.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressChange {
    pub record_id: i64,
    pub event_id: i64,
    pub before: Option<ProgressSnapshot>,
    pub after: Option<ProgressSnapshot>,
}

impl Database {
    pub fn progress_record(&self, user_id: &str, book_id: i64) -> Result<Option<ProgressRecord>> {
        load_record(&self.conn, user_id, book_id)
    }

    /// Replace the (user, book) record with whatever `next` returns (`None`
    /// deletes it) and append the matching change event in the same
    /// transaction. Returns `None` when there was nothing to delete.
    pub fn write_progress(
        &mut self,
        user_id: &str,
        book_id: i64,
        now: DateTime<Utc>,
        next: impl FnOnce(Option<&ProgressSnapshot>) -> Option<ProgressSnapshot>,
    ) -> Result<Option<ProgressChange>> {
        self.immediate(|transaction| {
            let current = load_record(transaction, user_id, book_id)?;
            let before = current.as_ref().map(|record| record.state.clone());
            let after = next(before.as_ref());

            let record_id = match (&current, &after) {
                (None, None) => return Ok(None),
                (_, Some(state)) => {
                    transaction
                        .execute(
                            "INSERT INTO progress_records (user_id, book_id, status, percent_complete, privacy, started_at, finished_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                             ON CONFLICT(user_id, book_id)
                             DO UPDATE SET status=excluded.status, percent_complete=excluded.percent_complete, privacy=excluded.privacy,
                                           started_at=excluded.started_at, finished_at=excluded.finished_at, updated_at=excluded.updated_at",
                            params![
                                user_id,
                                book_id,
                                state.status.as_str(),
                                state.percent_complete,
                                state.privacy.as_str(),
                                state.started_at.map(to_millis),
                                state.finished_at.map(to_millis),
                                to_millis(state.updated_at),
                            ],
                        )
                        .context("Failed to upsert progress record")?;

                    transaction
                        .query_row(
                            "SELECT id FROM progress_records WHERE user_id = ?1 AND book_id = ?2",
                            params![user_id, book_id],
                            |row| row.get::<_, i64>(0),
                        )
                        .context("Failed to read progress record id")?
                }
                (Some(record), None) => {
                    transaction
                        .execute("DELETE FROM progress_records WHERE id = ?1", params![record.id])
                        .context("Failed to delete progress record")?;
                    record.id
                }
            };

            let before_json = before.as_ref().map(serde_json::to_string).transpose()?;
            let after_json = after.as_ref().map(serde_json::to_string).transpose()?;
            transaction
                .execute(
                    "INSERT INTO progress_events (record_id, user_id, book_id, before_json, after_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![record_id, user_id, book_id, before_json, after_json, to_millis(now)],
                )
                .context("Failed to append progress event")?;
            let event_id = transaction.last_insert_rowid();

            Ok(Some(ProgressChange {
                record_id,
                event_id,
                before,
                after,
            }))
        })
    }

    /// Oldest unprocessed events first.
    pub fn pending_events(&self, limit: usize) -> Result<Vec<ProgressEvent>> {
        self.query_events(
            "SELECT id, record_id, before_json, after_json, created_at, attempts
             FROM progress_events
             WHERE processed_at IS NULL
             ORDER BY id ASC
             LIMIT ?1",
            limit,
        )
    }

    /// The oldest pending event of each (user, book) pair, least-retried first.
    /// A stuck event holds back later events of its own pair only.
    pub fn dispatchable_events(&self, limit: usize) -> Result<Vec<ProgressEvent>> {
        self.query_events(
            "SELECT e.id, e.record_id, e.before_json, e.after_json, e.created_at, e.attempts
             FROM progress_events e
             WHERE e.processed_at IS NULL
               AND NOT EXISTS (
                 SELECT 1 FROM progress_events p
                 WHERE p.processed_at IS NULL
                   AND p.user_id = e.user_id
                   AND p.book_id = e.book_id
                   AND p.id < e.id
               )
             ORDER BY e.attempts ASC, e.id ASC
             LIMIT ?1",
            limit,
        )
    }

    fn query_events(&self, sql: &str, limit: usize) -> Result<Vec<ProgressEvent>> {
        let mut statement = self.conn.prepare(sql)?;

        let raw = statement
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query pending events")?;

        let mut events = Vec::with_capacity(raw.len());
        for (id, record_id, before_json, after_json, created_at, attempts) in raw {
            let snapshots = parse_snapshot(id, before_json.as_deref())
                .and_then(|before| Ok((before, parse_snapshot(id, after_json.as_deref())?)));

            match snapshots {
                Ok((before, after)) => events.push(ProgressEvent {
                    id,
                    record_id,
                    before,
                    after,
                    created_at: from_millis(created_at),
                    attempts,
                }),
                Err(error) => {
                    warn!(event_id = id, error = %error, "malformed progress event; left pending");
                    self.mark_event_failed(id, &format!("{error:#}"))?;
                }
            }
        }

        Ok(events)
    }

    pub fn pending_event_count(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM progress_events WHERE processed_at IS NULL",
                [],
                |row| row.get(0),
            )
            .context("Failed to count pending events")
    }

    pub fn last_processed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let millis = self
            .conn
            .query_row(
                "SELECT MAX(processed_at) FROM progress_events",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .context("Failed to read last processed event time")?;

        Ok(millis.map(from_millis))
    }

    pub fn mark_event_processed(&self, event_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE progress_events SET processed_at = ?2, attempts = attempts + 1, last_error = NULL WHERE id = ?1",
                params![event_id, to_millis(now)],
            )
            .context("Failed to mark event processed")?;

        Ok(())
    }

    pub fn mark_event_failed(&self, event_id: i64, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE progress_events SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
                params![event_id, error],
            )
            .context("Failed to record event failure")?;

        Ok(())
    }

    /// Drop processed events and their applied markers older than `threshold`.
    pub fn purge_processed_events(&mut self, threshold: DateTime<Utc>) -> Result<usize> {
        self.immediate(|transaction| {
            transaction
                .execute(
                    "DELETE FROM applied_events WHERE event_id IN (
                       SELECT id FROM progress_events WHERE processed_at IS NOT NULL AND processed_at < ?1
                     )",
                    params![to_millis(threshold)],
                )
                .context("Failed to purge applied markers")?;

            let deleted = transaction
                .execute(
                    "DELETE FROM progress_events WHERE processed_at IS NOT NULL AND processed_at < ?1",
                    params![to_millis(threshold)],
                )
                .context("Failed to purge processed events")?;

            Ok(deleted)
        })
    }
}

pub(crate) fn load_record(conn: &Connection, user_id: &str, book_id: i64) -> Result<Option<ProgressRecord>> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, book_id, status, percent_complete, privacy, started_at, finished_at, updated_at
             FROM progress_records
             WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
            map_raw_record,
        )
        .optional()
        .context("Failed to load progress record")?;

    raw.map(RawRecord::into_record).transpose()
}

pub(crate) fn records_for_book(conn: &Connection, book_id: i64) -> Result<Vec<ProgressRecord>> {
    let mut statement = conn.prepare(
        "SELECT id, user_id, book_id, status, percent_complete, privacy, started_at, finished_at, updated_at
         FROM progress_records
         WHERE book_id = ?1
         ORDER BY id ASC",
    )?;

    let raw = statement
        .query_map(params![book_id], map_raw_record)?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to query progress records for book")?;

    raw.into_iter().map(RawRecord::into_record).collect()
}

pub(crate) fn finished_records_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<(i64, Option<DateTime<Utc>>)> {
    let (count, last_finished_at) = conn
        .query_row(
            "SELECT COUNT(*), MAX(COALESCE(finished_at, updated_at))
             FROM progress_records
             WHERE user_id = ?1 AND status = 'finished'",
            params![user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
        )
        .context("Failed to count finished records")?;

    Ok((count, last_finished_at.map(from_millis)))
}

pub(crate) fn pending_event_ids_for_user(conn: &Connection, user_id: &str) -> Result<Vec<i64>> {
    let mut statement = conn.prepare(
        "SELECT id FROM progress_events WHERE user_id = ?1 AND processed_at IS NULL ORDER BY id ASC",
    )?;

    let ids = statement
        .query_map(params![user_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to query pending events for user")?;

    Ok(ids)
}

struct RawRecord {
    id: i64,
    user_id: String,
    book_id: i64,
    status: String,
    percent_complete: Option<f64>,
    privacy: String,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    updated_at: i64,
}

impl RawRecord {
    fn into_record(self) -> Result<ProgressRecord> {
        Ok(ProgressRecord {
            id: self.id,
            state: ProgressSnapshot {
                user_id: self.user_id,
                book_id: self.book_id,
                status: ProgressStatus::parse(&self.status)?,
                percent_complete: self.percent_complete,
                privacy: Privacy::parse(&self.privacy)?,
                started_at: self.started_at.map(from_millis),
                finished_at: self.finished_at.map(from_millis),
                updated_at: from_millis(self.updated_at),
            },
        })
    }
}

fn map_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        book_id: row.get(2)?,
        status: row.get(3)?,
        percent_complete: row.get(4)?,
        privacy: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn parse_snapshot(event_id: i64, raw: Option<&str>) -> Result<Option<ProgressSnapshot>> {
    raw.map(|json| {
        serde_json::from_str(json)
            .map_err(|error| anyhow!("Malformed snapshot in progress event {event_id}: {error}"))
    })
    .transpose()
}
