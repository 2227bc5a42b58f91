use axum::{
    Router,
    routing::{delete, get, post, put},
};

use super::AppState;
use super::{bedtime, billing, child_profiles, explain, learning, stories, story, usage};

/// V1 API routes
///
/// ## Generation Routes
/// - POST /explain - Explain a topic at kid/parent/fun levels (auth optional, anon rate-limited)
/// - POST /story - Generate a custom story (Session Required)
/// - POST /bedtime - Generate a bedtime story (Session Required, Plus)
/// - POST /learning - Answer a learning question (Session Required, Plus)
///
/// ## Story Library (Session Required, Plus)
/// - GET    /stories - List saved stories, newest first
/// - GET    /stories/{story_id} - Get one saved story
/// - DELETE /stories/{story_id} - Delete a saved story
///
/// ## Child Profiles (Session Required)
/// - GET    /child-profiles - List child profiles
/// - POST   /child-profiles - Create a child profile (plan-limited)
/// - PUT    /child-profiles/{profile_id} - Update a child profile
/// - DELETE /child-profiles/{profile_id} - Delete a child profile
///
/// ## Usage (Session Required)
/// - GET /usage - Plan and daily quota summary
///
/// ## Billing
/// - POST /billing/checkout - Start a Plus checkout session (Session Required)
/// - POST /billing/webhook - Stripe webhook receiver (signature verified)
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        // ========================================
        // Generation: optional or session auth
        // ========================================
        .route("/explain", post(explain::explain_topic))
        .route("/story", post(story::create_story))
        .route("/bedtime", post(bedtime::create_bedtime_story))
        .route("/learning", post(learning::answer_question))
        // ========================================
        // Story Library: Session auth, Plus only
        // ========================================
        .route("/stories", get(stories::list_stories))
        .route("/stories/{story_id}", get(stories::get_story))
        .route("/stories/{story_id}", delete(stories::delete_story))
        // ========================================
        // Child Profiles: Session auth
        // ========================================
        .route("/child-profiles", get(child_profiles::list_child_profiles))
        .route("/child-profiles", post(child_profiles::create_child_profile))
        .route(
            "/child-profiles/{profile_id}",
            put(child_profiles::update_child_profile),
        )
        .route(
            "/child-profiles/{profile_id}",
            delete(child_profiles::delete_child_profile),
        )
        // ========================================
        // Usage: Session auth
        // ========================================
        .route("/usage", get(usage::get_usage))
        // ========================================
        // Billing: checkout + webhook sync
        // ========================================
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/webhook", post(billing::stripe_webhook))
}
