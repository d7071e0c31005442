use super::{Database, from_millis, to_millis};
use crate::stats::{BookStats, Profile, UserStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

impl Database {
    pub fn user_stats(&self, user_id: &str) -> Result<Option<UserStats>> {
        load_user_stats(&self.conn, user_id)
    }

    pub fn book_stats(&self, book_id: i64) -> Result<Option<BookStats>> {
        load_book_stats(&self.conn, book_id)
    }

    pub fn profile(&self, user_id: &str) -> Result<Option<Profile>> {
        load_profile(&self.conn, user_id)
    }

    pub fn upsert_profile(&self, profile: &Profile, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO profiles (user_id, display_name, photo_url, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id)
                 DO UPDATE SET display_name=excluded.display_name, photo_url=excluded.photo_url, updated_at=excluded.updated_at",
                params![&profile.user_id, &profile.display_name, &profile.photo_url, to_millis(now)],
            )
            .context("Failed to upsert profile")?;

        Ok(())
    }

    pub fn stats_row_counts(&self) -> Result<(i64, i64)> {
        self.conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM user_stats), (SELECT COUNT(*) FROM book_stats)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to count stats rows")
    }

    /// Users that have progress records or an existing stats row.
    pub fn known_user_ids(&self) -> Result<Vec<String>> {
        let mut statement = self.conn.prepare(
            "SELECT user_id FROM progress_records
             UNION
             SELECT user_id FROM user_stats
             ORDER BY 1",
        )?;

        let ids = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list users")?;

        Ok(ids)
    }

    /// Books that have progress records or an existing stats row.
    pub fn known_book_ids(&self) -> Result<Vec<i64>> {
        let mut statement = self.conn.prepare(
            "SELECT book_id FROM progress_records
             UNION
             SELECT book_id FROM book_stats
             ORDER BY 1",
        )?;

        let ids = statement
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list books")?;

        Ok(ids)
    }
}

pub(crate) fn load_user_stats(conn: &Connection, user_id: &str) -> Result<Option<UserStats>> {
    conn.query_row(
        "SELECT user_id, finished_count, last_finished_at, display_name, photo_url, updated_at
         FROM user_stats
         WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(UserStats {
                user_id: row.get(0)?,
                finished_count: row.get(1)?,
                last_finished_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
                display_name: row.get(3)?,
                photo_url: row.get(4)?,
                updated_at: from_millis(row.get(5)?),
            })
        },
    )
    .optional()
    .context("Failed to load user stats")
}

pub(crate) fn save_user_stats(conn: &Connection, stats: &UserStats) -> Result<()> {
    conn.execute(
        "INSERT INTO user_stats (user_id, finished_count, last_finished_at, display_name, photo_url, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id)
         DO UPDATE SET finished_count=excluded.finished_count, last_finished_at=excluded.last_finished_at,
                       display_name=excluded.display_name, photo_url=excluded.photo_url, updated_at=excluded.updated_at",
        params![
            &stats.user_id,
            stats.finished_count,
            stats.last_finished_at.map(to_millis),
            &stats.display_name,
            &stats.photo_url,
            to_millis(stats.updated_at),
        ],
    )
    .context("Failed to save user stats")?;

    Ok(())
}

pub(crate) fn load_book_stats(conn: &Connection, book_id: i64) -> Result<Option<BookStats>> {
    conn.query_row(
        "SELECT book_id, active_readers, finished_readers, reader_count, sum_percent, avg_percent, updated_at
         FROM book_stats
         WHERE book_id = ?1",
        params![book_id],
        |row| {
            Ok(BookStats {
                book_id: row.get(0)?,
                active_readers: row.get(1)?,
                finished_readers: row.get(2)?,
                reader_count: row.get(3)?,
                sum_percent: row.get(4)?,
                avg_percent: row.get(5)?,
                updated_at: from_millis(row.get(6)?),
            })
        },
    )
    .optional()
    .context("Failed to load book stats")
}

pub(crate) fn save_book_stats(conn: &Connection, stats: &BookStats) -> Result<()> {
    conn.execute(
        "INSERT INTO book_stats (book_id, active_readers, finished_readers, reader_count, sum_percent, avg_percent, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(book_id)
         DO UPDATE SET active_readers=excluded.active_readers, finished_readers=excluded.finished_readers,
                       reader_count=excluded.reader_count, sum_percent=excluded.sum_percent,
                       avg_percent=excluded.avg_percent, updated_at=excluded.updated_at",
        params![
            stats.book_id,
            stats.active_readers,
            stats.finished_readers,
            stats.reader_count,
            stats.sum_percent,
            stats.avg_percent,
            to_millis(stats.updated_at),
        ],
    )
    .context("Failed to save book stats")?;

    Ok(())
}

pub(crate) fn load_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>> {
    conn.query_row(
        "SELECT user_id, display_name, photo_url FROM profiles WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(Profile {
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                photo_url: row.get(2)?,
            })
        },
    )
    .optional()
    .context("Failed to load profile")
}

pub(crate) fn is_applied(conn: &Connection, event_id: i64, aggregate: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM applied_events WHERE event_id = ?1 AND aggregate = ?2)",
        params![event_id, aggregate],
        |row| row.get(0),
    )
    .context("Failed to check applied marker")
}

pub(crate) fn mark_applied(conn: &Connection, event_id: i64, aggregate: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO applied_events (event_id, aggregate, applied_at) VALUES (?1, ?2, ?3)",
        params![event_id, aggregate, to_millis(now)],
    )
    .context("Failed to write applied marker")?;

    Ok(())
}
