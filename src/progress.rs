use crate::db::{Database, ProgressChange};
use crate::error::{CoreError, CoreResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    Reading,
    Finished,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::Reading => "reading",
            ProgressStatus::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "reading" => Ok(ProgressStatus::Reading),
            "finished" => Ok(ProgressStatus::Finished),
            _ => anyhow::bail!("Unknown progress status: {raw}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "public" => Ok(Privacy::Public),
            "private" => Ok(Privacy::Private),
            _ => anyhow::bail!("Unknown privacy value: {raw}"),
        }
    }
}

/// Field snapshot of one progress record, as carried by change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub user_id: String,
    pub book_id: i64,
    pub status: ProgressStatus,
    pub percent_complete: Option<f64>,
    pub privacy: Privacy,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: i64,
    #[serde(flatten)]
    pub state: ProgressSnapshot,
}

/// One change-feed row. `id` doubles as the idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub id: i64,
    pub record_id: i64,
    pub before: Option<ProgressSnapshot>,
    pub after: Option<ProgressSnapshot>,
    pub created_at: DateTime<Utc>,
    pub attempts: i64,
}

impl ProgressEvent {
    pub fn user_id(&self) -> Option<&str> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|snapshot| snapshot.user_id.as_str())
    }

    pub fn book_id(&self) -> Option<i64> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|snapshot| snapshot.book_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub status: ProgressStatus,
    pub percent_complete: Option<f64>,
    pub privacy: Option<Privacy>,
}

/// Upsert the (user, book) record and append its change event atomically.
pub fn record_progress(
    database: &mut Database,
    user_id: &str,
    book_id: i64,
    update: &ProgressUpdate,
    now: DateTime<Utc>,
) -> CoreResult<ProgressChange> {
    if user_id.trim().is_empty() {
        return Err(CoreError::InvalidInput("user id must not be empty".to_string()));
    }
    if let Some(percent) = update.percent_complete {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(CoreError::InvalidInput(format!(
                "percentComplete must be within 0..=100, got {percent}"
            )));
        }
    }

    let change = database
        .write_progress(user_id, book_id, now, |current| {
            Some(next_snapshot(current, user_id, book_id, update, now))
        })?
        .ok_or_else(|| CoreError::NotFound(format!("progress for {user_id}/{book_id}")))?;

    Ok(change)
}

pub fn remove_progress(
    database: &mut Database,
    user_id: &str,
    book_id: i64,
    now: DateTime<Utc>,
) -> CoreResult<ProgressChange> {
    database
        .write_progress(user_id, book_id, now, |_| None)?
        .ok_or_else(|| CoreError::NotFound(format!("progress for {user_id}/{book_id}")))
}

/// Next record state for an update.
///
/// `started_at` is set on the first move out of not_started and kept after
/// that; `finished_at` is set when entering finished and cleared when leaving.
pub fn next_snapshot(
    current: Option<&ProgressSnapshot>,
    user_id: &str,
    book_id: i64,
    update: &ProgressUpdate,
    now: DateTime<Utc>,
) -> ProgressSnapshot {
    let current_status = current.map(|snapshot| snapshot.status);

    let percent_complete = match update.status {
        ProgressStatus::NotStarted => None,
        ProgressStatus::Reading => update
            .percent_complete
            .or_else(|| current.and_then(|snapshot| snapshot.percent_complete))
            .or(Some(0.0)),
        ProgressStatus::Finished => update.percent_complete.or(Some(100.0)),
    };

    let started_at = current
        .and_then(|snapshot| snapshot.started_at)
        .or_else(|| (update.status != ProgressStatus::NotStarted).then_some(now));

    let finished_at = match (update.status, current_status) {
        (ProgressStatus::Finished, Some(ProgressStatus::Finished)) => current
            .and_then(|snapshot| snapshot.finished_at)
            .or(Some(now)),
        (ProgressStatus::Finished, _) => Some(now),
        _ => None,
    };

    ProgressSnapshot {
        user_id: user_id.to_string(),
        book_id,
        status: update.status,
        percent_complete,
        privacy: update
            .privacy
            .or_else(|| current.map(|snapshot| snapshot.privacy))
            .unwrap_or_default(),
        started_at,
        finished_at,
        updated_at: now,
    }
}
