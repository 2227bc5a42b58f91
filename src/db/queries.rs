// Persistence helpers for the log-and-swallow save paths. A failed save
// never fails the user-visible request; callers get a Result so they can
// decide what to log.

use sqlx::{PgPool, Row};
use uuid::Uuid;

pub async fn insert_story(
    pool: &PgPool,
    user_id: &str,
    child_id: Option<Uuid>,
    title: &str,
    mode: &str,
    content: &str,
    metadata: &serde_json::Value,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO stories (user_id, child_id, title, mode, content, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(child_id)
    .bind(title)
    .bind(mode)
    .bind(content)
    .bind(metadata)
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn insert_chat_session(
    pool: &PgPool,
    user_id: &str,
    child_id: Option<Uuid>,
    mode: &str,
    messages: &serde_json::Value,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO chat_sessions (user_id, child_id, mode, messages, token_usage)
        VALUES ($1, $2, $3, $4, 0)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(child_id)
    .bind(mode)
    .bind(messages)
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

/// Owner-scoped child profile lookup for story personalization. Absence and
/// read failure both come back as None; personalization silently degrades.
pub async fn child_profile_for_user(
    pool: &PgPool,
    child_id: Uuid,
    user_id: &str,
) -> Option<crate::models::ChildProfile> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, name, age, favorites, created_at
        FROM child_profiles
        WHERE id = $1
          AND user_id = $2
        "#,
    )
    .bind(child_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await;

    match row {
        Ok(Some(r)) => Some(crate::models::ChildProfile {
            id: r.get("id"),
            user_id: r.get("user_id"),
            name: r.get("name"),
            age: r.get("age"),
            favorites: r.get("favorites"),
            created_at: r.get("created_at"),
        }),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Child profile lookup failed for {}: {}", user_id, e);
            None
        }
    }
}
