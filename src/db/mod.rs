pub mod progress;
pub mod queries;
pub mod stats;

pub use progress::ProgressChange;

use crate::goals::model::{Entry, GoalRow, Milestone, ValidatedGoal};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::fs;
use std::path::Path;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set SQLite busy timeout")?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })
    }

    /// Run `work` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so read-modify-write sequences on the
    /// aggregate tables cannot interleave with another writer.
    pub fn immediate<T>(&mut self, work: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let transaction = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to start immediate transaction")?;

        let value = work(&transaction)?;
        transaction.commit().context("Failed to commit transaction")?;

        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn insert_goal(&mut self, goal: &ValidatedGoal, now: DateTime<Utc>) -> Result<i64> {
        self.immediate(|transaction| {
            transaction
                .execute(
                    "INSERT INTO goals (owner_id, title, goal_type, measure, cadence, target_count, target_quantity, unit, due_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        &goal.owner_id,
                        &goal.title,
                        goal.goal_type.as_str(),
                        goal.measure.map(|measure| measure.as_str()),
                        goal.cadence.map(|cadence| cadence.as_str()),
                        goal.target_count,
                        goal.target_quantity,
                        &goal.unit,
                        goal.due_at.map(to_millis),
                        to_millis(now),
                    ],
                )
                .context("Failed to insert goal")?;
            let goal_id = transaction.last_insert_rowid();

            goal.milestones
                .iter()
                .enumerate()
                .try_for_each(|(position, title)| {
                    transaction
                        .execute(
                            "INSERT INTO milestones (goal_id, title, position) VALUES (?1, ?2, ?3)",
                            params![goal_id, title, position as i64],
                        )
                        .context("Failed to insert milestone")
                        .map(|_| ())
                })?;

            Ok(goal_id)
        })
    }

    pub fn goal_row(&self, goal_id: i64) -> Result<Option<GoalRow>> {
        self.conn
            .query_row(
                &format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?1"),
                params![goal_id],
                map_goal_row,
            )
            .optional()
            .context("Failed to load goal")
    }

    pub fn goal_rows_for_owner(&self, owner_id: &str, include_archived: bool) -> Result<Vec<GoalRow>> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals
             WHERE owner_id = ?1 AND (?2 OR archived = 0)
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = statement
            .query_map(params![owner_id, include_archived], map_goal_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list goals")?;

        Ok(rows)
    }

    pub fn archive_goal(&self, goal_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE goals SET archived = 1, updated_at = ?2 WHERE id = ?1",
                params![goal_id, to_millis(now)],
            )
            .context("Failed to archive goal")?;

        Ok(updated > 0)
    }

    pub fn set_goal_completed(&self, goal_id: i64, completed: bool, now: DateTime<Utc>) -> Result<bool> {
        let completed_at = completed.then(|| to_millis(now));
        let updated = self
            .conn
            .execute(
                "UPDATE goals SET completed = ?2, completed_at = ?3, updated_at = ?4
                 WHERE id = ?1 AND goal_type = 'one_time'",
                params![goal_id, completed, completed_at, to_millis(now)],
            )
            .context("Failed to update goal completion")?;

        Ok(updated > 0)
    }

    pub fn milestones_for_goal(&self, goal_id: i64) -> Result<Vec<Milestone>> {
        let mut statement = self.conn.prepare(
            "SELECT id, goal_id, title, position, done, done_at
             FROM milestones
             WHERE goal_id = ?1
             ORDER BY position ASC, id ASC",
        )?;

        let rows = statement
            .query_map(params![goal_id], map_milestone)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query milestones")?;

        Ok(rows)
    }

    pub fn milestone(&self, milestone_id: i64) -> Result<Option<Milestone>> {
        self.conn
            .query_row(
                "SELECT id, goal_id, title, position, done, done_at FROM milestones WHERE id = ?1",
                params![milestone_id],
                map_milestone,
            )
            .optional()
            .context("Failed to load milestone")
    }

    pub fn set_milestone_done(&self, milestone_id: i64, done: bool, now: DateTime<Utc>) -> Result<bool> {
        let done_at = done.then(|| to_millis(now));
        let updated = self
            .conn
            .execute(
                "UPDATE milestones SET done = ?2, done_at = ?3 WHERE id = ?1",
                params![milestone_id, done, done_at],
            )
            .context("Failed to toggle milestone")?;

        Ok(updated > 0)
    }

    /// Renumber a goal's milestones to follow `ordered_ids`.
    ///
    /// Returns `false` without writing when `ordered_ids` is not exactly the
    /// goal's milestone set.
    pub fn reorder_milestones(&mut self, goal_id: i64, ordered_ids: &[i64]) -> Result<bool> {
        self.immediate(|transaction| {
            let mut statement =
                transaction.prepare("SELECT id FROM milestones WHERE goal_id = ?1 ORDER BY id")?;
            let mut existing = statement
                .query_map(params![goal_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read milestone ids")?;
            drop(statement);

            let mut requested = ordered_ids.to_vec();
            requested.sort_unstable();
            existing.sort_unstable();
            if requested != existing {
                return Ok(false);
            }

            ordered_ids
                .iter()
                .enumerate()
                .try_for_each(|(position, id)| {
                    transaction
                        .execute(
                            "UPDATE milestones SET position = ?2 WHERE id = ?1",
                            params![id, position as i64],
                        )
                        .context("Failed to renumber milestone")
                        .map(|_| ())
                })?;

            Ok(true)
        })
    }

    pub fn insert_entry(
        &self,
        goal_id: i64,
        owner_id: &str,
        occurred_at: DateTime<Utc>,
        quantity: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO entries (goal_id, owner_id, occurred_at, quantity, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![goal_id, owner_id, to_millis(occurred_at), quantity, to_millis(now)],
            )
            .context("Failed to insert entry")?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn entry(&self, entry_id: i64) -> Result<Option<Entry>> {
        self.conn
            .query_row(
                "SELECT id, goal_id, owner_id, occurred_at, quantity FROM entries WHERE id = ?1",
                params![entry_id],
                map_entry,
            )
            .optional()
            .context("Failed to load entry")
    }

    pub fn update_entry(&self, entry_id: i64, occurred_at: DateTime<Utc>, quantity: Option<f64>) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE entries SET occurred_at = ?2, quantity = ?3 WHERE id = ?1",
                params![entry_id, to_millis(occurred_at), quantity],
            )
            .context("Failed to update entry")?;

        Ok(updated > 0)
    }

    pub fn delete_entry(&self, entry_id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM entries WHERE id = ?1", params![entry_id])
            .context("Failed to delete entry")?;

        Ok(deleted > 0)
    }

    /// Entries of a goal with `from <= occurred_at < to`; open bounds are unbounded.
    pub fn entries_between(
        &self,
        goal_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Entry>> {
        let mut statement = self.conn.prepare(
            "SELECT id, goal_id, owner_id, occurred_at, quantity
             FROM entries
             WHERE goal_id = ?1
               AND (?2 IS NULL OR occurred_at >= ?2)
               AND (?3 IS NULL OR occurred_at < ?3)
             ORDER BY occurred_at ASC, id ASC",
        )?;

        let rows = statement
            .query_map(
                params![goal_id, from.map(to_millis), to.map(to_millis)],
                map_entry,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query entries")?;

        Ok(rows)
    }
}

const GOAL_COLUMNS: &str = "id, owner_id, title, goal_type, measure, cadence, target_count, target_quantity, unit, due_at, completed, completed_at, archived, created_at, updated_at";

fn map_goal_row(row: &Row<'_>) -> rusqlite::Result<GoalRow> {
    Ok(GoalRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        goal_type: row.get(3)?,
        measure: row.get(4)?,
        cadence: row.get(5)?,
        target_count: row.get(6)?,
        target_quantity: row.get(7)?,
        unit: row.get(8)?,
        due_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
        completed: row.get(10)?,
        completed_at: row.get::<_, Option<i64>>(11)?.map(from_millis),
        archived: row.get(12)?,
        created_at: from_millis(row.get(13)?),
        updated_at: from_millis(row.get(14)?),
    })
}

fn map_milestone(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        goal_id: row.get(1)?,
        title: row.get(2)?,
        order: row.get(3)?,
        done: row.get(4)?,
        done_at: row.get::<_, Option<i64>>(5)?.map(from_millis),
    })
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        goal_id: row.get(1)?,
        owner_id: row.get(2)?,
        occurred_at: from_millis(row.get(3)?),
        quantity: row.get(4)?,
    })
}

pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::model::{GoalType, NewGoal};
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn milestone_goal(database: &mut Database) -> i64 {
        let goal = NewGoal {
            owner_id: "u1".to_string(),
            title: "Finish the reading guide".to_string(),
            goal_type: GoalType::Milestone,
            cadence: None,
            target_count: None,
            target_quantity: None,
            unit: None,
            due_at: None,
            milestones: vec!["outline".to_string(), "draft".to_string(), "publish".to_string()],
        }
        .validate()
        .unwrap();

        database.insert_goal(&goal, Utc::now()).unwrap()
    }

    #[test]
    fn reorder_renumbers_the_whole_set() {
        let dir = tempdir().unwrap();
        let mut database = Database::open(&dir.path().join("shelf.db")).unwrap();
        let goal_id = milestone_goal(&mut database);

        let ids = database
            .milestones_for_goal(goal_id)
            .unwrap()
            .iter()
            .map(|milestone| milestone.id)
            .collect::<Vec<_>>();
        let reversed = ids.iter().rev().copied().collect::<Vec<_>>();

        assert!(database.reorder_milestones(goal_id, &reversed).unwrap());
        let titles = database
            .milestones_for_goal(goal_id)
            .unwrap()
            .into_iter()
            .map(|milestone| (milestone.order, milestone.title))
            .collect::<Vec<_>>();
        assert_eq!(
            titles,
            vec![
                (0, "publish".to_string()),
                (1, "draft".to_string()),
                (2, "outline".to_string())
            ]
        );

        assert!(!database.reorder_milestones(goal_id, &reversed[..2]).unwrap());
    }

    #[test]
    fn entries_between_uses_half_open_range() {
        let dir = tempdir().unwrap();
        let mut database = Database::open(&dir.path().join("shelf.db")).unwrap();
        let goal = NewGoal {
            owner_id: "u1".to_string(),
            title: "Read every week".to_string(),
            goal_type: GoalType::Habit,
            cadence: Some("week".to_string()),
            target_count: Some(1),
            target_quantity: None,
            unit: None,
            due_at: None,
            milestones: Vec::new(),
        }
        .validate()
        .unwrap();
        let goal_id = database.insert_goal(&goal, Utc::now()).unwrap();

        let start = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap();
        let end = start + Duration::days(7);

        for occurred_at in [start - Duration::milliseconds(1), start, end - Duration::seconds(1), end] {
            database.insert_entry(goal_id, "u1", occurred_at, None, Utc::now()).unwrap();
        }

        let entries = database.entries_between(goal_id, Some(start), Some(end)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].occurred_at, start);
        assert_eq!(entries[1].occurred_at, end - Duration::seconds(1));
        assert_eq!(database.entries_between(goal_id, None, None).unwrap().len(), 4);
    }
}
