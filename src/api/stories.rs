use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::AppState;
use crate::entitlements::{self, Feature};
use crate::middleware::{ErrorResponse, require_session_from_headers};

// ============================================
// Response Types
// ============================================

#[derive(Debug, Serialize)]
pub struct StoryResponse {
    pub id: Uuid,
    pub child_id: Option<Uuid>,
    pub title: Option<String>,
    pub mode: Option<String>,
    pub content: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<StoryChildInfo>,
}

#[derive(Debug, Serialize)]
pub struct StoryChildInfo {
    pub id: Uuid,
    pub name: String,
    pub age: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct StoriesListResponse {
    pub stories: Vec<StoryResponse>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

// ============================================
// Helpers
// ============================================

async fn require_save_feature(
    state: &AppState,
    user_id: &str,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let plan = entitlements::resolve_plan(&state.db, user_id).await;
    if !entitlements::has_feature(plan, Feature::SaveAndReplay) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(
                ErrorResponse::new(
                    "Save & Replay is only available with MiniMind Plus",
                    "FEATURE_NOT_ON_PLAN",
                )
                .upgrade_required(),
            ),
        ));
    }
    Ok(())
}

fn story_from_row(row: &sqlx::postgres::PgRow) -> StoryResponse {
    let child_profile_id: Option<Uuid> = row.get("child_profile_id");
    StoryResponse {
        id: row.get("id"),
        child_id: row.get("child_id"),
        title: row.get("title"),
        mode: row.get("mode"),
        content: row.get("content"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        child: child_profile_id.map(|id| StoryChildInfo {
            id,
            name: row.get("child_name"),
            age: row.get("child_age"),
        }),
    }
}

const STORY_SELECT: &str = r#"
    SELECT
        s.id, s.child_id, s.title, s.mode, s.content, s.metadata, s.created_at,
        cp.id AS child_profile_id,
        cp.name AS child_name,
        cp.age AS child_age
    FROM stories s
    LEFT JOIN child_profiles cp ON s.child_id = cp.id
"#;

// ============================================
// Handlers
// ============================================

/// List the user's saved stories, newest first.
///
/// **Auth: Session Required** — gated on save_and_replay.
pub async fn list_stories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StoriesListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    require_save_feature(&state, &user.user_id).await?;

    let rows = sqlx::query(&format!(
        "{} WHERE s.user_id = $1 ORDER BY s.created_at DESC",
        STORY_SELECT
    ))
    .bind(&user.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to fetch stories for {}: {}", user.user_id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to fetch stories", "DB_QUERY_FAILED")),
        )
    })?;

    Ok(Json(StoriesListResponse {
        stories: rows.iter().map(story_from_row).collect(),
    }))
}

/// Get one saved story.
///
/// **Auth: Session Required** — gated on save_and_replay; owner-scoped.
pub async fn get_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(story_id): Path<Uuid>,
) -> Result<Json<StoryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    require_save_feature(&state, &user.user_id).await?;

    let row = sqlx::query(&format!(
        "{} WHERE s.id = $1 AND s.user_id = $2",
        STORY_SELECT
    ))
    .bind(story_id)
    .bind(&user.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to fetch story {}: {}", story_id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to fetch story", "DB_QUERY_FAILED")),
        )
    })?;

    match row {
        Some(row) => Ok(Json(story_from_row(&row))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Story not found", "STORY_NOT_FOUND")),
        )),
    }
}

/// Delete a saved story.
///
/// **Auth: Session Required** — gated on save_and_replay; owner-scoped.
pub async fn delete_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(story_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    require_save_feature(&state, &user.user_id).await?;

    sqlx::query("DELETE FROM stories WHERE id = $1 AND user_id = $2")
        .bind(story_id)
        .bind(&user.user_id)
        .execute(&state.db)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete story {}: {}", story_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to delete story", "DB_DELETE_FAILED")),
            )
        })?;

    Ok(Json(DeleteResponse { success: true }))
}
