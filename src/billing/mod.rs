pub mod sync;
pub mod webhook;

use serde::Deserialize;
use thiserror::Error;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("stripe request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stripe returned {status}: {body}")]
    Provider {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid coupon code")]
    InvalidCoupon,

    #[error("webhook error: {0}")]
    Webhook(String),
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeCoupon {
    valid: bool,
}

/// Minimal Stripe API client: customer creation and subscription checkout.
/// Billing UI, invoices, and portal flows live on Stripe's side.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.into(),
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<reqwest::Response, BillingError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Provider { status, body });
        }
        Ok(response)
    }

    /// Create a Stripe customer tagged with our user id.
    pub async fn create_customer(
        &self,
        email: &str,
        user_id: &str,
    ) -> Result<String, BillingError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("metadata[app_user_id]".to_string(), user_id.to_string()),
        ];
        let customer: StripeCustomer = self.post_form("/customers", &form).await?.json().await?;
        Ok(customer.id)
    }

    /// Validate a coupon code; invalid or unknown codes error.
    pub async fn validate_coupon(&self, coupon: &str) -> Result<(), BillingError> {
        let response = self
            .http
            .get(format!("{}/coupons/{}", self.base_url, coupon))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::InvalidCoupon);
        }

        let parsed: StripeCoupon = response.json().await?;
        if parsed.valid {
            Ok(())
        } else {
            Err(BillingError::InvalidCoupon)
        }
    }

    /// Create a subscription-mode checkout session and return its id.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
        app_url: &str,
        coupon: Option<&str>,
    ) -> Result<String, BillingError> {
        let mut form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("mode".to_string(), "subscription".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "success_url".to_string(),
                format!("{}/app?success=true", app_url),
            ),
            (
                "cancel_url".to_string(),
                format!("{}/pricing?canceled=true", app_url),
            ),
            ("metadata[app_user_id]".to_string(), user_id.to_string()),
        ];

        // Stripe rejects allow_promotion_codes together with discounts.
        match coupon {
            Some(coupon) => {
                form.push(("discounts[0][coupon]".to_string(), coupon.to_string()));
            }
            None => {
                form.push(("allow_promotion_codes".to_string(), "true".to_string()));
            }
        }

        let session: StripeCheckoutSession = self
            .post_form("/checkout/sessions", &form)
            .await?
            .json()
            .await?;
        Ok(session.id)
    }
}
