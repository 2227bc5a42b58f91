use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use sqlx::Row;
use uuid::Uuid;

use super::AppState;
use crate::entitlements;
use crate::middleware::{ErrorResponse, require_session_from_headers};
use crate::models::ChildProfile;

// ============================================
// Request Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct CreateChildProfileRequest {
    #[serde(deserialize_with = "validate_name")]
    pub name: String,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub favorites: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChildProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub favorites: Option<serde_json::Value>,
}

// Custom deserializer for name validation
fn validate_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(serde::de::Error::custom("Missing name"));
    }

    const MAX_NAME_LENGTH: usize = 100;
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(serde::de::Error::custom(format!(
            "Name exceeds maximum length of {} characters",
            MAX_NAME_LENGTH
        )));
    }

    Ok(trimmed.to_string())
}

fn profile_from_row(row: &sqlx::postgres::PgRow) -> ChildProfile {
    ChildProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        age: row.get("age"),
        favorites: row.get("favorites"),
        created_at: row.get("created_at"),
    }
}

fn db_error(action: &str, e: sqlx::Error) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Child profile {} failed: {}", action, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Something went wrong", "DB_QUERY_FAILED")),
    )
}

// ============================================
// Handlers
// ============================================

/// List the user's child profiles, oldest first.
///
/// **Auth: Session Required**
pub async fn list_child_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChildProfile>>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    let rows = sqlx::query(
        "SELECT id, user_id, name, age, favorites, created_at
         FROM child_profiles WHERE user_id = $1 ORDER BY created_at ASC",
    )
    .bind(&user.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| db_error("list", e))?;

    Ok(Json(rows.iter().map(profile_from_row).collect()))
}

/// Create a child profile, subject to the plan's profile limit.
///
/// **Auth: Session Required**
pub async fn create_child_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateChildProfileRequest>,
) -> Result<(StatusCode, Json<ChildProfile>), (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    let gate = entitlements::can_create_child_profile(&state.db, &user.user_id).await;
    if !gate.allowed {
        return Err((
            StatusCode::FORBIDDEN,
            Json(
                ErrorResponse::new(
                    gate.reason
                        .unwrap_or_else(|| "Profile limit reached".to_string()),
                    "PROFILE_LIMIT_REACHED",
                )
                .upgrade_required(),
            ),
        ));
    }

    let favorites = request.favorites.unwrap_or_else(|| serde_json::json!({}));

    let row = sqlx::query(
        "INSERT INTO child_profiles (id, user_id, name, age, favorites)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, user_id, name, age, favorites, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(&user.user_id)
    .bind(&request.name)
    .bind(request.age)
    .bind(&favorites)
    .fetch_one(&state.db)
    .await
    .map_err(|e| db_error("create", e))?;

    Ok((StatusCode::CREATED, Json(profile_from_row(&row))))
}

/// Update a child profile. Only the provided fields change.
///
/// **Auth: Session Required** — owner-scoped.
pub async fn update_child_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(profile_id): Path<Uuid>,
    Json(request): Json<UpdateChildProfileRequest>,
) -> Result<Json<ChildProfile>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    if let Some(name) = &request.name {
        if name.trim().is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Name cannot be empty", "VALIDATION_FAILED")),
            ));
        }
    }

    let row = sqlx::query(
        "UPDATE child_profiles
         SET name = COALESCE($3, name),
             age = COALESCE($4, age),
             favorites = COALESCE($5, favorites)
         WHERE id = $1 AND user_id = $2
         RETURNING id, user_id, name, age, favorites, created_at",
    )
    .bind(profile_id)
    .bind(&user.user_id)
    .bind(request.name.as_ref().map(|n| n.trim().to_string()))
    .bind(request.age)
    .bind(request.favorites.as_ref())
    .fetch_optional(&state.db)
    .await
    .map_err(|e| db_error("update", e))?;

    match row {
        Some(row) => Ok(Json(profile_from_row(&row))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Child profile not found", "PROFILE_NOT_FOUND")),
        )),
    }
}

/// Delete a child profile.
///
/// **Auth: Session Required** — owner-scoped.
pub async fn delete_child_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(profile_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    let result = sqlx::query("DELETE FROM child_profiles WHERE id = $1 AND user_id = $2")
        .bind(profile_id)
        .bind(&user.user_id)
        .execute(&state.db)
        .await
        .map_err(|e| db_error("delete", e))?;

    if result.rows_affected() == 0 {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Child profile not found", "PROFILE_NOT_FOUND")),
        ));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}
