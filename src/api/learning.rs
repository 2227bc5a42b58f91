use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::db::queries;
use crate::entitlements::{self, Feature};
use crate::llm::prompts;
use crate::middleware::{ErrorResponse, require_session_from_headers};
use crate::recovery::{LearningResult, parse_learning};

fn default_age() -> i32 {
    6
}

#[derive(Debug, Deserialize)]
pub struct LearningRequest {
    #[serde(deserialize_with = "validate_question")]
    pub question: String,
    #[serde(default = "default_age")]
    pub age: i32,
    #[serde(default)]
    pub subject: Option<String>,
}

fn validate_question<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let question = String::deserialize(deserializer)?;

    const MAX_QUESTION_LENGTH: usize = 4 * 1024;
    if question.len() > MAX_QUESTION_LENGTH {
        return Err(serde::de::Error::custom(format!(
            "Question exceeds maximum length of {} bytes",
            MAX_QUESTION_LENGTH
        )));
    }

    if question.trim().is_empty() {
        return Err(serde::de::Error::custom("Missing question"));
    }

    Ok(question)
}

/// Answer a learning question at the child's level.
///
/// **Auth: Session Required** — learning mode is a Plus feature.
pub async fn answer_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LearningRequest>,
) -> Result<Json<LearningResult>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    let plan = entitlements::resolve_plan(&state.db, &user.user_id).await;

    if !entitlements::has_feature(plan, Feature::LearningMode) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(
                ErrorResponse::new(
                    "Learning mode is only available with MiniMind Plus",
                    "FEATURE_NOT_ON_PLAN",
                )
                .upgrade_required(),
            ),
        ));
    }

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

    let prompt =
        prompts::learning_prompt(&request.question, request.age, request.subject.as_deref());

    let raw = state.llm.generate(&prompt, 0.7).await.map_err(|e| {
        tracing::error!("Learning generation failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Something went wrong", "GENERATION_FAILED")),
        )
    })?;

    let learning = parse_learning(&raw);

    if entitlements::has_feature(plan, Feature::SaveAndReplay) {
        let messages = json!([
            { "role": "user", "content": request.question },
            { "role": "assistant", "content": learning },
        ]);
        if let Err(e) =
            queries::insert_chat_session(&state.db, &user.user_id, None, "learning", &messages)
                .await
        {
            tracing::error!("Failed to save learning session for {}: {}", user.user_id, e);
        }
    }

    entitlements::increment_usage(&state.db, &user.user_id).await;

    Ok(Json(learning))
}
