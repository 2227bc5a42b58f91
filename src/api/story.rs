use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::db::queries;
use crate::entitlements::{self, Feature};
use crate::llm::prompts;
use crate::middleware::{ErrorResponse, require_session_from_headers};
use crate::recovery::{StoryResult, parse_story};

// ============================================
// Request Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct StoryRequest {
    #[serde(deserialize_with = "validate_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub child_id: Option<Uuid>,
    #[serde(default)]
    pub personalized: bool,
}

// Custom deserializer for prompt validation
pub(super) fn validate_prompt<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let prompt = String::deserialize(deserializer)?;

    const MAX_PROMPT_LENGTH: usize = 4 * 1024;
    if prompt.len() > MAX_PROMPT_LENGTH {
        return Err(serde::de::Error::custom(format!(
            "Prompt exceeds maximum length of {} bytes",
            MAX_PROMPT_LENGTH
        )));
    }

    if prompt.trim().is_empty() {
        return Err(serde::de::Error::custom("Missing prompt"));
    }

    Ok(prompt)
}

// ============================================
// Handler
// ============================================

/// Generate a custom story, optionally personalized for a child profile.
///
/// **Auth: Session Required**
pub async fn create_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StoryRequest>,
) -> Result<Json<StoryResult>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    // Quota first: denial must not cost a generation call.
    let gate = entitlements::can_chat(&state.db, &user.user_id).await;
    if !gate.allowed {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(
                ErrorResponse::new(
                    gate.reason.unwrap_or_else(|| "Daily limit reached".to_string()),
                    "DAILY_LIMIT_REACHED",
                )
                .limit_reached(),
            ),
        ));
    }

    let plan = entitlements::resolve_plan(&state.db, &user.user_id).await;

    if request.personalized && !entitlements::has_feature(plan, Feature::StoryPersonalization) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(
                ErrorResponse::new(
                    "Story personalization is only available with MiniMind Plus",
                    "FEATURE_NOT_ON_PLAN",
                )
                .upgrade_required(),
            ),
        ));
    }

    let child = match (request.personalized, request.child_id) {
        (true, Some(child_id)) => {
            queries::child_profile_for_user(&state.db, child_id, &user.user_id).await
        }
        _ => None,
    };

    let prompt = prompts::story_prompt(&request.prompt, child.as_ref());

    let raw = state.llm.generate(&prompt, 0.8).await.map_err(|e| {
        tracing::error!("Story generation failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Something went wrong", "GENERATION_FAILED")),
        )
    })?;

    let story = parse_story(&raw);

    if entitlements::has_feature(plan, Feature::SaveAndReplay) {
        let metadata = json!({
            "prompt": request.prompt,
            "personalized": request.personalized,
            "moral": story.moral,
        });
        if let Err(e) = queries::insert_story(
            &state.db,
            &user.user_id,
            request.child_id,
            &story.title,
            "custom",
            &story.content,
            &metadata,
        )
        .await
        {
            tracing::error!("Failed to save story for {}: {}", user.user_id, e);
        }
    }

    entitlements::increment_usage(&state.db, &user.user_id).await;

    Ok(Json(story))
}
