// Stripe webhook verification and event parsing.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::BillingError;

/// How far a webhook timestamp may drift from our clock (seconds).
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Webhook event types we act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    CheckoutSessionCompleted,
    CustomerSubscriptionUpdated,
    CustomerSubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    Unknown(String),
}

impl From<&str> for WebhookEventType {
    fn from(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.updated" => Self::CustomerSubscriptionUpdated,
            "customer.subscription.deleted" => Self::CustomerSubscriptionDeleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Parsed, verified webhook event.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: WebhookEventType,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone)]
pub enum WebhookEventData {
    CheckoutSession(CheckoutSessionData),
    Subscription(SubscriptionData),
    Invoice(InvoiceData),
    Raw(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionData {
    /// Our user id, carried in the session metadata at checkout creation.
    pub user_id: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionData {
    pub subscription_id: String,
    pub customer_id: String,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct InvoiceData {
    pub subscription_id: Option<String>,
    pub period_end: Option<DateTime<Utc>>,
}

/// Verifies signatures and parses payloads into typed events.
#[derive(Clone)]
pub struct WebhookHandler {
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, BillingError> {
        self.verify_signature(payload, signature, Utc::now().timestamp())?;
        Self::parse(payload)
    }

    /// Verify the `Stripe-Signature` header (`t=timestamp,v1=hex-hmac`)
    /// against the raw payload. `now` is injected for tests.
    fn verify_signature(
        &self,
        payload: &[u8],
        signature: &str,
        now: i64,
    ) -> Result<(), BillingError> {
        let mut timestamp: Option<&str> = None;
        let mut sig_v1: Option<&str> = None;

        for part in signature.split(',') {
            if let Some((key, value)) = part.split_once('=') {
                match key.trim() {
                    "t" => timestamp = Some(value),
                    "v1" => sig_v1 = Some(value),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| BillingError::Webhook("Missing timestamp".to_string()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| BillingError::Webhook("Missing signature".to_string()))?;

        let payload_str = std::str::from_utf8(payload)
            .map_err(|_| BillingError::Webhook("Invalid payload encoding".to_string()))?;
        let signed_payload = format!("{}.{}", timestamp, payload_str);

        let mut mac = Hmac::<Sha256>::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| BillingError::Webhook("HMAC key error".to_string()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if !constant_time_eq(sig_v1.as_bytes(), expected.as_bytes()) {
            tracing::warn!("Webhook signature verification failed");
            return Err(BillingError::Webhook(
                "Signature verification failed".to_string(),
            ));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| BillingError::Webhook("Invalid timestamp format".to_string()))?;
        if (now - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(timestamp = ts, now = now, "Webhook timestamp too old");
            return Err(BillingError::Webhook("Timestamp too old".to_string()));
        }

        Ok(())
    }

    fn parse(payload: &[u8]) -> Result<WebhookEvent, BillingError> {
        let raw: RawStripeEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::Webhook(e.to_string()))?;

        let event_type = WebhookEventType::from(raw.event_type.as_str());
        let data = Self::parse_event_data(&event_type, raw.data.object)?;

        Ok(WebhookEvent {
            id: raw.id,
            event_type,
            data,
        })
    }

    fn parse_event_data(
        event_type: &WebhookEventType,
        object: serde_json::Value,
    ) -> Result<WebhookEventData, BillingError> {
        match event_type {
            WebhookEventType::CheckoutSessionCompleted => {
                let session: RawCheckoutSession = serde_json::from_value(object)
                    .map_err(|e| BillingError::Webhook(e.to_string()))?;
                Ok(WebhookEventData::CheckoutSession(CheckoutSessionData {
                    user_id: session.metadata.and_then(|m| m.app_user_id),
                    customer_id: session.customer,
                    subscription_id: session.subscription,
                }))
            }
            WebhookEventType::CustomerSubscriptionUpdated
            | WebhookEventType::CustomerSubscriptionDeleted => {
                let sub: RawSubscription = serde_json::from_value(object)
                    .map_err(|e| BillingError::Webhook(e.to_string()))?;
                Ok(WebhookEventData::Subscription(SubscriptionData {
                    subscription_id: sub.id,
                    customer_id: sub.customer,
                    status: sub.status,
                    current_period_end: sub
                        .current_period_end
                        .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                }))
            }
            WebhookEventType::InvoicePaymentSucceeded
            | WebhookEventType::InvoicePaymentFailed => {
                let invoice: RawInvoice = serde_json::from_value(object)
                    .map_err(|e| BillingError::Webhook(e.to_string()))?;
                Ok(WebhookEventData::Invoice(InvoiceData {
                    subscription_id: invoice.subscription,
                    period_end: invoice
                        .period_end
                        .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                }))
            }
            WebhookEventType::Unknown(_) => Ok(WebhookEventData::Raw(object)),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

// Raw Stripe payload shapes

#[derive(Debug, Deserialize)]
struct RawStripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    customer: Option<String>,
    subscription: Option<String>,
    metadata: Option<RawSessionMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawSessionMetadata {
    app_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    customer: String,
    status: String,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    subscription: Option<String>,
    period_end: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    const PAYLOAD: &str = r#"{"id":"evt_1","type":"customer.subscription.deleted","data":{"object":{"id":"sub_1","customer":"cus_1","status":"canceled","current_period_end":1735689600}}}"#;

    #[test]
    fn valid_signature_is_accepted() {
        let handler = WebhookHandler::new("whsec_test");
        let now = 1_700_000_000;
        let sig = sign("whsec_test", now, PAYLOAD);
        assert!(handler
            .verify_signature(PAYLOAD.as_bytes(), &sig, now)
            .is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let handler = WebhookHandler::new("whsec_test");
        let now = 1_700_000_000;
        let sig = sign("whsec_other", now, PAYLOAD);
        assert!(handler
            .verify_signature(PAYLOAD.as_bytes(), &sig, now)
            .is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let handler = WebhookHandler::new("whsec_test");
        let then = 1_700_000_000;
        let sig = sign("whsec_test", then, PAYLOAD);
        let result =
            handler.verify_signature(PAYLOAD.as_bytes(), &sig, then + TIMESTAMP_TOLERANCE_SECS + 1);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let handler = WebhookHandler::new("whsec_test");
        assert!(handler
            .verify_signature(PAYLOAD.as_bytes(), "v1=deadbeef", 0)
            .is_err());
        assert!(handler
            .verify_signature(PAYLOAD.as_bytes(), "t=123", 0)
            .is_err());
    }

    #[test]
    fn event_types_map_from_strings() {
        assert_eq!(
            WebhookEventType::from("checkout.session.completed"),
            WebhookEventType::CheckoutSessionCompleted
        );
        assert_eq!(
            WebhookEventType::from("invoice.payment_failed"),
            WebhookEventType::InvoicePaymentFailed
        );
        assert!(matches!(
            WebhookEventType::from("charge.refunded"),
            WebhookEventType::Unknown(_)
        ));
    }

    #[test]
    fn subscription_event_parses_period_end() {
        let event = WebhookHandler::parse(PAYLOAD.as_bytes()).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, WebhookEventType::CustomerSubscriptionDeleted);
        match event.data {
            WebhookEventData::Subscription(sub) => {
                assert_eq!(sub.subscription_id, "sub_1");
                assert_eq!(sub.status, "canceled");
                assert!(sub.current_period_end.is_some());
            }
            other => panic!("unexpected event data: {:?}", other),
        }
    }

    #[test]
    fn checkout_event_carries_user_metadata() {
        let payload = r#"{"id":"evt_2","type":"checkout.session.completed","data":{"object":{"id":"cs_1","customer":"cus_9","subscription":"sub_9","metadata":{"app_user_id":"user-42"}}}}"#;
        let event = WebhookHandler::parse(payload.as_bytes()).unwrap();
        match event.data {
            WebhookEventData::CheckoutSession(session) => {
                assert_eq!(session.user_id.as_deref(), Some("user-42"));
                assert_eq!(session.customer_id.as_deref(), Some("cus_9"));
            }
            other => panic!("unexpected event data: {:?}", other),
        }
    }

    #[test]
    fn unknown_events_parse_to_raw() {
        let payload =
            r#"{"id":"evt_3","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        let event = WebhookHandler::parse(payload.as_bytes()).unwrap();
        assert!(matches!(event.data, WebhookEventData::Raw(_)));
    }
}
