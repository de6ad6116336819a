use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    users,
    web::{
        AppState,
        auth::AuthClaims,
        error::{AppError, Result},
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/:id", delete(delete_task).patch(update_task))
        .route("/api/tasks/completions", post(complete_task))
        .route("/api/tasks/completions/:date", get(completions_for_date))
        .route(
            "/api/tasks/completions/:task_id/:date",
            delete(uncomplete_task),
        )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskItem {
    id: Uuid,
    name: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    name: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for TaskItem {
    fn from(row: TaskRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskItem>,
}

#[derive(Serialize)]
struct TaskResponse {
    task: TaskItem,
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<TaskListResponse>> {
    let rows = sqlx::query_as::<_, TaskRow>(
        "SELECT id, name, enabled, created_at, updated_at
         FROM routine_tasks
         ORDER BY created_at ASC",
    )
    .fetch_all(state.pool_ref())
    .await?;

    Ok(Json(TaskListResponse {
        tasks: rows.into_iter().map(TaskItem::from).collect(),
    }))
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    name: String,
}

async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Task name is required".to_string()));
    }

    let row = sqlx::query_as::<_, TaskRow>(
        "INSERT INTO routine_tasks (name) VALUES ($1)
         RETURNING id, name, enabled, created_at, updated_at",
    )
    .bind(name)
    .fetch_one(state.pool_ref())
    .await?;

    info!(task_id = %row.id, "routine task created");

    Ok((
        StatusCode::CREATED,
        Json(TaskResponse {
            task: row.into(),
        }),
    ))
}

#[derive(Deserialize)]
struct UpdateTaskRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>> {
    if request.name.is_none() && request.enabled.is_none() {
        return Err(AppError::Validation(
            "At least one of name or enabled must be provided".to_string(),
        ));
    }

    let name = match request.name.as_deref().map(str::trim) {
        Some("") => {
            return Err(AppError::Validation("Task name must not be blank".to_string()));
        }
        other => other,
    };

    let row = sqlx::query_as::<_, TaskRow>(
        "UPDATE routine_tasks SET
             name = COALESCE($2, name),
             enabled = COALESCE($3, enabled),
             updated_at = NOW()
         WHERE id = $1
         RETURNING id, name, enabled, created_at, updated_at",
    )
    .bind(task_id)
    .bind(name)
    .bind(request.enabled)
    .fetch_optional(state.pool_ref())
    .await?
    .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;

    Ok(Json(TaskResponse { task: row.into() }))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode> {
    let result = sqlx::query("DELETE FROM routine_tasks WHERE id = $1")
        .bind(task_id)
        .execute(state.pool_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("task {task_id}")));
    }

    info!(%task_id, "routine task deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionItem {
    id: Uuid,
    task_id: Uuid,
    completion_date: String,
    completed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CompletionRow {
    id: Uuid,
    task_id: Uuid,
    completion_date: NaiveDate,
    completed_at: DateTime<Utc>,
}

impl From<CompletionRow> for CompletionItem {
    fn from(row: CompletionRow) -> Self {
        Self {
            id: row.id,
            task_id: row.task_id,
            completion_date: row.completion_date.to_string(),
            completed_at: row.completed_at,
        }
    }
}

#[derive(Serialize)]
struct CompletionListResponse {
    completions: Vec<CompletionItem>,
}

async fn completions_for_date(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(date): Path<String>,
) -> Result<Json<CompletionListResponse>> {
    let date = parse_completion_date(&date)?;
    let user = users::resolve_user(state.pool_ref(), &claims).await?;

    let rows = sqlx::query_as::<_, CompletionRow>(
        "SELECT id, task_id, completion_date, completed_at
         FROM routine_completions
         WHERE user_id = $1 AND completion_date = $2
         ORDER BY completed_at ASC",
    )
    .bind(user.id)
    .bind(date)
    .fetch_all(state.pool_ref())
    .await?;

    Ok(Json(CompletionListResponse {
        completions: rows.into_iter().map(CompletionItem::from).collect(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteTaskRequest {
    task_id: Uuid,
    completion_date: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteTaskResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    completion: Option<CompletionItem>,
    already_completed: bool,
}

async fn complete_task(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Json(request): Json<CompleteTaskRequest>,
) -> Result<Json<CompleteTaskResponse>> {
    let date = parse_completion_date(&request.completion_date)?;
    let user = users::resolve_user(state.pool_ref(), &claims).await?;

    let row = sqlx::query_as::<_, CompletionRow>(
        "INSERT INTO routine_completions (task_id, user_id, completion_date)
         VALUES ($1, $2, $3)
         ON CONFLICT (task_id, user_id, completion_date) DO NOTHING
         RETURNING id, task_id, completion_date, completed_at",
    )
    .bind(request.task_id)
    .bind(user.id)
    .bind(date)
    .fetch_optional(state.pool_ref())
    .await?;

    let already_completed = row.is_none();

    Ok(Json(CompleteTaskResponse {
        completion: row.map(CompletionItem::from),
        already_completed,
    }))
}

async fn uncomplete_task(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path((task_id, date)): Path<(Uuid, String)>,
) -> Result<StatusCode> {
    let date = parse_completion_date(&date)?;
    let user = users::resolve_user(state.pool_ref(), &claims).await?;

    sqlx::query(
        "DELETE FROM routine_completions
         WHERE task_id = $1 AND user_id = $2 AND completion_date = $3",
    )
    .bind(task_id)
    .bind(user.id)
    .bind(date)
    .execute(state.pool_ref())
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn parse_completion_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppError::Validation("Completion date must be formatted as YYYY-MM-DD".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_dates_parse_iso_format_only() {
        assert_eq!(
            parse_completion_date("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!(parse_completion_date("01-15-2024").is_err());
        assert!(parse_completion_date("today").is_err());
    }
}
