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
use crate::recovery::{BedtimeResult, parse_bedtime};

#[derive(Debug, Deserialize)]
pub struct BedtimeRequest {
    #[serde(deserialize_with = "super::story::validate_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub child_id: Option<Uuid>,
    #[serde(default)]
    pub include_poem: bool,
}

/// Generate a calm bedtime story, optionally ending in a lullaby.
///
/// **Auth: Session Required** — bedtime mode is a Plus feature.
pub async fn create_bedtime_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BedtimeRequest>,
) -> Result<Json<BedtimeResult>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    let plan = entitlements::resolve_plan(&state.db, &user.user_id).await;

    if !entitlements::has_feature(plan, Feature::BedtimeMode) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(
                ErrorResponse::new(
                    "Bedtime mode is only available with MiniMind Plus",
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

    let child = match request.child_id {
        Some(child_id) => {
            queries::child_profile_for_user(&state.db, child_id, &user.user_id).await
        }
        None => None,
    };

    let prompt = prompts::bedtime_prompt(&request.prompt, child.as_ref(), request.include_poem);

    // Lower temperature for more consistent, calmer output.
    let raw = state.llm.generate(&prompt, 0.6).await.map_err(|e| {
        tracing::error!("Bedtime generation failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Something went wrong", "GENERATION_FAILED")),
        )
    })?;

    let bedtime = parse_bedtime(&raw);

    if entitlements::has_feature(plan, Feature::SaveAndReplay) {
        let metadata = json!({
            "prompt": request.prompt,
            "includePoem": request.include_poem,
            "poem": bedtime.poem,
            "sleepyMessage": bedtime.sleepy_message,
        });
        if let Err(e) = queries::insert_story(
            &state.db,
            &user.user_id,
            request.child_id,
            &bedtime.title,
            "bedtime",
            &bedtime.content,
            &metadata,
        )
        .await
        {
            tracing::error!("Failed to save bedtime story for {}: {}", user.user_id, e);
        }
    }

    entitlements::increment_usage(&state.db, &user.user_id).await;

    Ok(Json(bedtime))
}
