use sqlx::PgPool;
use std::sync::Arc;

use crate::billing::{StripeClient, webhook::WebhookHandler};
use crate::config::Config;
use crate::llm::OpenAiClient;
use crate::middleware::rate_limit::AnonymousRateLimiter;

pub mod bedtime;
pub mod billing;
pub mod child_profiles;
pub mod explain;
pub mod health;
pub mod learning;
pub mod routes;
pub mod stories;
pub mod story;
pub mod usage;

// ============================================
// Application State
// ============================================

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub llm: OpenAiClient,
    pub stripe: StripeClient,
    pub webhooks: WebhookHandler,
    /// Process-local limiter for unauthenticated explain requests.
    pub anon_limiter: Arc<AnonymousRateLimiter>,
    pub stripe_price_id: String,
    pub app_url: String,
}

impl AppState {
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            llm: OpenAiClient::new(&config.openai_api_key, &config.openai_model),
            stripe: StripeClient::new(&config.stripe_secret_key),
            webhooks: WebhookHandler::new(&config.stripe_webhook_secret),
            anon_limiter: Arc::new(AnonymousRateLimiter::default()),
            stripe_price_id: config.stripe_price_id.clone(),
            app_url: config.app_url.clone(),
        }
    }
}
