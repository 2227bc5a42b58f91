use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use super::AppState;
use crate::entitlements::{self, UsageSummary};
use crate::middleware::{ErrorResponse, require_session_from_headers};

/// Current plan and daily quota state for the signed-in user.
///
/// **Auth: Session Required**
pub async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageSummary>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let summary = entitlements::usage_summary(&state.db, &user.user_id).await;
    Ok(Json(summary))
}
