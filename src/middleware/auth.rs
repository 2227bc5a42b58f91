use axum::{
    Json,
    http::{StatusCode, header},
};
use serde::Serialize;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

#[derive(Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Set when the remedy is upgrading the plan (feature not included).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_required: Option<bool>,
    /// Set when the remedy is waiting for the quota window to reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_reached: Option<bool>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            upgrade_required: None,
            limit_reached: None,
        }
    }

    pub fn upgrade_required(mut self) -> Self {
        self.upgrade_required = Some(true);
        self
    }

    pub fn limit_reached(mut self) -> Self {
        self.limit_reached = Some(true);
        self
    }
}

async fn validate_session(db: &PgPool, token: &str) -> Result<AuthenticatedUser, String> {
    let result = sqlx::query(
        r#"
        SELECT
            s.user_id,
            u.email
        FROM session s
        JOIN app_user u ON s.user_id = u.id
        WHERE s.token = $1
          AND s.expires_at > NOW()
        "#,
    )
    .bind(token)
    .fetch_optional(db)
    .await;

    match result {
        Ok(Some(row)) => Ok(AuthenticatedUser {
            user_id: row.get("user_id"),
            email: row.get("email"),
        }),
        Ok(None) => Err("Invalid or expired session".to_string()),
        Err(e) => Err(format!("Database error: {}", e)),
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

pub async fn require_session_from_headers(
    db: &PgPool,
    headers: &axum::http::HeaderMap,
) -> Result<AuthenticatedUser, (StatusCode, Json<ErrorResponse>)> {
    let token = match bearer_token(headers) {
        Some(t) => t,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "Session token required. Please log in.",
                    "SESSION_REQUIRED",
                )),
            ));
        }
    };

    validate_session(db, token).await.map_err(|err| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(err, "SESSION_INVALID")),
        )
    })
}

/// Resolve the caller if a valid session is present; anonymous callers and
/// any lookup failure both come back as None (fails closed to the
/// unauthenticated path, which has its own rate limit).
pub async fn optional_session_from_headers(
    db: &PgPool,
    headers: &axum::http::HeaderMap,
) -> Option<AuthenticatedUser> {
    let token = bearer_token(headers)?;
    validate_session(db, token).await.ok()
}
