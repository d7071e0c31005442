use crate::config::Config;
use crate::db::{Database, ProgressChange};
use crate::error::CoreError;
use crate::goals::{self, Entry, Goal, GoalProgress, Milestone, NewGoal};
use crate::progress::{self, ProgressRecord, ProgressUpdate};
use crate::stats::{BookStats, Profile, UserStats};
use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub wake: Arc<Notify>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/status", get(status))
        .route("/api/v1/goals", get(goal_list).post(goal_create))
        .route("/api/v1/goals/:id", get(goal_get).delete(goal_archive))
        .route("/api/v1/goals/:id/progress", get(goal_progress))
        .route("/api/v1/goals/:id/completion", put(goal_completion))
        .route("/api/v1/goals/:id/entries", get(entry_list).post(entry_create))
        .route("/api/v1/goals/:id/milestones/order", put(milestone_reorder))
        .route("/api/v1/entries/:id", patch(entry_update).delete(entry_delete))
        .route("/api/v1/milestones/:id/done", put(milestone_toggle))
        .route(
            "/api/v1/users/:user_id/books/:book_id/progress",
            get(progress_get).put(progress_put).delete(progress_delete),
        )
        .route("/api/v1/users/:id/profile", put(profile_put))
        .route("/api/v1/users/:id/stats", get(user_stats))
        .route("/api/v1/books/:id/stats", get(book_stats))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AtQuery {
    at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerQuery {
    owner: String,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct DonePayload {
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPayload {
    occurred_at: Option<DateTime<Utc>>,
    quantity: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePayload {
    display_name: String,
    photo_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    pending_events: i64,
    last_processed_at: Option<DateTime<Utc>>,
    api_port: u16,
}

#[derive(Debug, Serialize)]
struct EntriesPayload {
    count: usize,
    entries: Vec<Entry>,
}

async fn status(State(state): State<ApiState>) -> ApiResult<Json<StatusPayload>> {
    let database = Database::open(&state.config.db_path)?;

    Ok(Json(StatusPayload {
        pending_events: database.pending_event_count()?,
        last_processed_at: database.last_processed_at()?,
        api_port: state.config.api_port,
    }))
}

async fn goal_list(
    State(state): State<ApiState>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<Vec<Goal>>> {
    let database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::list_goals(&database, &query.owner)?))
}

async fn goal_create(
    State(state): State<ApiState>,
    Json(payload): Json<NewGoal>,
) -> ApiResult<(StatusCode, Json<Goal>)> {
    let mut database = Database::open(&state.config.db_path)?;
    let goal = goals::create_goal(&mut database, payload, Utc::now())?;
    Ok((StatusCode::CREATED, Json(goal)))
}

async fn goal_get(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<Json<Goal>> {
    let database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::load_goal(&database, id)?))
}

async fn goal_archive(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let database = Database::open(&state.config.db_path)?;
    goals::archive_goal(&database, id, Utc::now())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn goal_progress(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<AtQuery>,
) -> ApiResult<Json<GoalProgress>> {
    let at = parse_instant(query.at.as_deref())?.unwrap_or_else(Utc::now);
    let database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::goal_progress(&database, id, at)?))
}

async fn goal_completion(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<CompletionPayload>,
) -> ApiResult<Json<Goal>> {
    let database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::set_one_time_completed(
        &database,
        id,
        payload.completed,
        Utc::now(),
    )?))
}

async fn entry_list(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<EntriesPayload>> {
    let from = parse_instant(query.from.as_deref())?;
    let to = parse_instant(query.to.as_deref())?;

    let database = Database::open(&state.config.db_path)?;
    let entries = goals::list_entries(&database, id, from, to)?;

    Ok(Json(EntriesPayload {
        count: entries.len(),
        entries,
    }))
}

async fn entry_create(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<EntryPayload>,
) -> ApiResult<(StatusCode, Json<Entry>)> {
    let now = Utc::now();
    let database = Database::open(&state.config.db_path)?;
    let entry = goals::add_entry(
        &database,
        id,
        payload.occurred_at.unwrap_or(now),
        payload.quantity,
        now,
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn entry_update(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<EntryPayload>,
) -> ApiResult<Json<Entry>> {
    let database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::update_entry(
        &database,
        id,
        payload.occurred_at,
        payload.quantity,
    )?))
}

async fn entry_delete(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let database = Database::open(&state.config.db_path)?;
    goals::delete_entry(&database, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn milestone_toggle(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<DonePayload>,
) -> ApiResult<Json<Milestone>> {
    let database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::toggle_milestone(&database, id, payload.done, Utc::now())?))
}

async fn milestone_reorder(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<OrderPayload>,
) -> ApiResult<Json<Vec<Milestone>>> {
    let mut database = Database::open(&state.config.db_path)?;
    Ok(Json(goals::reorder_milestones(&mut database, id, &payload.ids)?))
}

async fn progress_get(
    State(state): State<ApiState>,
    Path((user_id, book_id)): Path<(String, i64)>,
) -> ApiResult<Json<ProgressRecord>> {
    let database = Database::open(&state.config.db_path)?;
    let record = database
        .progress_record(&user_id, book_id)?
        .ok_or_else(|| ApiError::NotFound(format!("No progress for {user_id} on book {book_id}")))?;
    Ok(Json(record))
}

async fn progress_put(
    State(state): State<ApiState>,
    Path((user_id, book_id)): Path<(String, i64)>,
    Json(payload): Json<ProgressUpdate>,
) -> ApiResult<Json<ProgressChange>> {
    let mut database = Database::open(&state.config.db_path)?;
    let change = progress::record_progress(&mut database, &user_id, book_id, &payload, Utc::now())?;
    state.wake.notify_one();
    Ok(Json(change))
}

async fn progress_delete(
    State(state): State<ApiState>,
    Path((user_id, book_id)): Path<(String, i64)>,
) -> ApiResult<Json<ProgressChange>> {
    let mut database = Database::open(&state.config.db_path)?;
    let change = progress::remove_progress(&mut database, &user_id, book_id, Utc::now())?;
    state.wake.notify_one();
    Ok(Json(change))
}

async fn profile_put(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(payload): Json<ProfilePayload>,
) -> ApiResult<Json<Profile>> {
    let display_name = payload.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ApiError::BadRequest("displayName must not be empty".to_string()));
    }

    let profile = Profile {
        user_id: id,
        display_name,
        photo_url: payload.photo_url.filter(|url| !url.trim().is_empty()),
    };
    let database = Database::open(&state.config.db_path)?;
    database.upsert_profile(&profile, Utc::now())?;

    Ok(Json(profile))
}

async fn user_stats(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<UserStats>> {
    let database = Database::open(&state.config.db_path)?;
    let stats = database
        .user_stats(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("No stats for user {id}")))?;
    Ok(Json(stats))
}

async fn book_stats(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<Json<BookStats>> {
    let database = Database::open(&state.config.db_path)?;
    let stats = database
        .book_stats(id)?
        .ok_or_else(|| ApiError::NotFound(format!("No stats for book {id}")))?;
    Ok(Json(stats))
}

fn parse_instant(raw: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|instant| instant.with_timezone(&Utc))
            .with_context(|| format!("Invalid timestamp: {value}. Example: 2025-01-10T09:00:00Z"))
            .map_err(|error| ApiError::BadRequest(format!("{error:#}")))
    })
    .transpose()
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value)
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::NotFound(_) => Self::NotFound(value.to_string()),
            CoreError::InvalidGoal(_) | CoreError::InvalidCadence(_) => {
                Self::Unprocessable(value.to_string())
            }
            CoreError::InvalidInput(_) => Self::BadRequest(value.to_string()),
            CoreError::Storage(error) => Self::Internal(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Unprocessable(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": message })),
            )
                .into_response(),
            ApiError::Internal(error) => {
                warn!(error = %error, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": error.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: CoreError) -> StatusCode {
        ApiError::from(error).into_response().status()
    }

    #[test]
    fn core_errors_map_to_http_statuses() {
        assert_eq!(status_of(CoreError::NotFound("goal 1".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(CoreError::InvalidCadence("fortnight".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(CoreError::InvalidGoal("no unit".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_of(CoreError::InvalidInput("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(CoreError::Storage(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn progress_query_accepts_rfc3339_only() {
        let parsed = parse_instant(Some("2025-01-10T09:00:00+02:00")).unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-01-10T07:00:00+00:00");
        assert!(parse_instant(None).unwrap().is_none());
        assert!(matches!(parse_instant(Some("2025-01-10")), Err(ApiError::BadRequest(_))));
    }
}
