use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;

use super::AppState;
use crate::entitlements;
use crate::llm::prompts;
use crate::middleware::rate_limit::client_ip;
use crate::middleware::{ErrorResponse, optional_session_from_headers};
use crate::recovery::{ExplainResult, parse_explain};

// ============================================
// Request Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    #[serde(deserialize_with = "validate_topic")]
    pub topic: String,
}

// Custom deserializer for topic validation
fn validate_topic<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let topic = String::deserialize(deserializer)?;

    const MAX_TOPIC_LENGTH: usize = 2 * 1024;
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(serde::de::Error::custom(format!(
            "Topic exceeds maximum length of {} bytes",
            MAX_TOPIC_LENGTH
        )));
    }

    if topic.trim().is_empty() {
        return Err(serde::de::Error::custom("Missing topic"));
    }

    Ok(topic)
}

// ============================================
// Handler
// ============================================

/// Explain a topic at kid / parent / fun levels.
///
/// **Auth: Optional** — signed-in users spend daily quota; anonymous
/// callers go through the per-IP limiter instead.
pub async fn explain_topic(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExplainRequest>,
) -> Result<Json<ExplainResult>, (StatusCode, Json<ErrorResponse>)> {
    let user = optional_session_from_headers(&state.db, &headers).await;

    match &user {
        Some(user) => {
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
        }
        None => {
            let ip = client_ip(&headers);
            let decision = state.anon_limiter.check(ip).await;
            if !decision.allowed {
                return Err((
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(
                        ErrorResponse::new(
                            decision
                                .reason
                                .unwrap_or_else(|| "Rate limit exceeded".to_string()),
                            "RATE_LIMITED",
                        )
                        .limit_reached(),
                    ),
                ));
            }
        }
    }

    let prompt = prompts::explain_prompt(&request.topic);

    let raw = state.llm.generate(&prompt, 0.7).await.map_err(|e| {
        tracing::error!("Explain generation failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Something went wrong", "GENERATION_FAILED")),
        )
    })?;

    // Recovery never fails; malformed output degrades to usable content.
    let result = parse_explain(&raw);

    // Quota is only spent by signed-in users, after a successful generation.
    if let Some(user) = &user {
        entitlements::increment_usage(&state.db, &user.user_id).await;
    }

    Ok(Json(result))
}
