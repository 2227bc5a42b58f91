use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::AppState;
use crate::billing::sync;
use crate::middleware::{ErrorResponse, require_session_from_headers};

// ============================================
// Request / Response Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub coupon: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

// ============================================
// Handlers
// ============================================

/// Start a Plus subscription checkout. Creates the Stripe customer on
/// first use and stores its id on the profile.
///
/// **Auth: Session Required**
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;

    let row = sqlx::query("SELECT stripe_customer_id FROM profiles WHERE user_id = $1")
        .bind(&user.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load profile for {}: {}", user.user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Something went wrong", "DB_QUERY_FAILED")),
            )
        })?;

    let existing_customer: Option<String> =
        row.and_then(|row| row.get("stripe_customer_id"));

    let customer_id = match existing_customer {
        Some(id) => id,
        None => {
            let id = state
                .stripe
                .create_customer(&user.email, &user.user_id)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create customer for {}: {}", user.user_id, e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse::new(
                            "Failed to start checkout",
                            "BILLING_FAILED",
                        )),
                    )
                })?;

            if let Err(e) = sqlx::query(
                "UPDATE profiles SET stripe_customer_id = $2 WHERE user_id = $1",
            )
            .bind(&user.user_id)
            .bind(&id)
            .execute(&state.db)
            .await
            {
                tracing::error!("Failed to store customer id for {}: {}", user.user_id, e);
            }

            id
        }
    };

    if let Some(coupon) = &request.coupon {
        if let Err(e) = state.stripe.validate_coupon(coupon).await {
            tracing::warn!("Coupon rejected for {}: {}", user.user_id, e);
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Invalid coupon code", "INVALID_COUPON")),
            ));
        }
    }

    let session_id = state
        .stripe
        .create_checkout_session(
            &customer_id,
            &state.stripe_price_id,
            &user.user_id,
            &state.app_url,
            request.coupon.as_deref(),
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to create checkout session for {}: {}", user.user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(
                    "Failed to start checkout",
                    "BILLING_FAILED",
                )),
            )
        })?;

    Ok(Json(CheckoutResponse { session_id }))
}

/// Receive Stripe webhook events and sync subscription state.
///
/// **Auth: Stripe signature** — the body must be verified raw, before
/// any JSON handling.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing signature", "SIGNATURE_MISSING")),
            )
        })?;

    let event = state.webhooks.verify_and_parse(&body, signature).map_err(|e| {
        tracing::warn!("Webhook rejected: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid webhook", "SIGNATURE_INVALID")),
        )
    })?;

    tracing::info!("Stripe webhook received: {:?} ({})", event.event_type, event.id);

    sync::apply_event(&state.db, &event).await.map_err(|e| {
        tracing::error!("Webhook sync failed for event {}: {}", event.id, e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Webhook processing failed", "SYNC_FAILED")),
        )
    })?;

    Ok(Json(serde_json::json!({ "received": true })))
}
