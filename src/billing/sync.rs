// Mapping webhook events onto profile/subscription rows.
//
// Stripe re-delivers events, so every handler re-derives the resulting
// state from the event instead of applying a delta; applying the same
// event twice lands on the same rows.

use sqlx::{PgPool, Row};

use super::webhook::{WebhookEvent, WebhookEventData, WebhookEventType};

/// Apply a verified webhook event to the database.
pub async fn apply_event(pool: &PgPool, event: &WebhookEvent) -> Result<(), sqlx::Error> {
    match (&event.event_type, &event.data) {
        (WebhookEventType::CheckoutSessionCompleted, WebhookEventData::CheckoutSession(session)) => {
            let Some(user_id) = &session.user_id else {
                tracing::error!("No user id in checkout session metadata, event {}", event.id);
                return Ok(());
            };

            tracing::info!(
                "Checkout completed for user {} customer {:?}",
                user_id,
                session.customer_id
            );

            sqlx::query(
                r#"
                UPDATE profiles
                SET plan = 'plus', stripe_customer_id = $2
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .bind(&session.customer_id)
            .execute(pool)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO subscriptions
                    (user_id, stripe_customer_id, stripe_subscription_id, plan, status)
                VALUES ($1, $2, $3, 'plus', 'active')
                ON CONFLICT (user_id)
                DO UPDATE SET
                    stripe_customer_id = EXCLUDED.stripe_customer_id,
                    stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                    plan = 'plus',
                    status = 'active'
                "#,
            )
            .bind(user_id)
            .bind(&session.customer_id)
            .bind(&session.subscription_id)
            .execute(pool)
            .await?;
        }

        (WebhookEventType::CustomerSubscriptionUpdated, WebhookEventData::Subscription(sub)) => {
            let Some(user_id) = user_id_for_customer(pool, &sub.customer_id).await? else {
                tracing::error!("No profile found for customer {}", sub.customer_id);
                return Ok(());
            };

            // The plan is derived from the status on every delivery.
            let plan = if sub.status == "active" { "plus" } else { "free" };

            sqlx::query("UPDATE profiles SET plan = $2 WHERE user_id = $1")
                .bind(&user_id)
                .bind(plan)
                .execute(pool)
                .await?;

            sqlx::query(
                r#"
                UPDATE subscriptions
                SET plan = $2,
                    status = $3,
                    current_period_end = COALESCE($4, current_period_end)
                WHERE stripe_subscription_id = $1
                "#,
            )
            .bind(&sub.subscription_id)
            .bind(plan)
            .bind(&sub.status)
            .bind(sub.current_period_end)
            .execute(pool)
            .await?;
        }

        (WebhookEventType::CustomerSubscriptionDeleted, WebhookEventData::Subscription(sub)) => {
            let Some(user_id) = user_id_for_customer(pool, &sub.customer_id).await? else {
                tracing::error!("No profile found for customer {}", sub.customer_id);
                return Ok(());
            };

            sqlx::query("UPDATE profiles SET plan = 'free' WHERE user_id = $1")
                .bind(&user_id)
                .execute(pool)
                .await?;

            sqlx::query(
                r#"
                UPDATE subscriptions
                SET plan = 'free', status = 'canceled'
                WHERE stripe_subscription_id = $1
                "#,
            )
            .bind(&sub.subscription_id)
            .execute(pool)
            .await?;
        }

        (WebhookEventType::InvoicePaymentSucceeded, WebhookEventData::Invoice(invoice)) => {
            if let Some(subscription_id) = &invoice.subscription_id {
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'active',
                        current_period_end = COALESCE($2, current_period_end)
                    WHERE stripe_subscription_id = $1
                    "#,
                )
                .bind(subscription_id)
                .bind(invoice.period_end)
                .execute(pool)
                .await?;
            }
        }

        (WebhookEventType::InvoicePaymentFailed, WebhookEventData::Invoice(invoice)) => {
            if let Some(subscription_id) = &invoice.subscription_id {
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'past_due'
                    WHERE stripe_subscription_id = $1
                    "#,
                )
                .bind(subscription_id)
                .execute(pool)
                .await?;
            }
        }

        (WebhookEventType::Unknown(event_type), _) => {
            tracing::info!("Unhandled webhook event type: {}", event_type);
        }

        // Type/data mismatches cannot come out of the parser.
        _ => {
            tracing::warn!("Mismatched webhook event shape for {}", event.id);
        }
    }

    Ok(())
}

async fn user_id_for_customer(
    pool: &PgPool,
    customer_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT user_id FROM profiles WHERE stripe_customer_id = $1")
        .bind(customer_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get("user_id")))
}
