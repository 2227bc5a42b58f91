// Entitlement engine: plan resolution, feature flags, daily quotas.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

// ============================================
// Plans & Limits
// ============================================

/// Subscription plan tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Plus,
}

/// Static per-plan limits
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlanLimits {
    pub daily_chats: i64,
    pub max_child_profiles: i64,
    pub save_history_days: i64,
}

impl Plan {
    /// Limits for this plan. The Plus daily cap is a fair-use ceiling
    /// presented as "unlimited" in the UI.
    pub const fn limits(&self) -> PlanLimits {
        match self {
            Self::Free => PlanLimits {
                daily_chats: 5,
                max_child_profiles: 1,
                save_history_days: 0,
            },
            Self::Plus => PlanLimits {
                daily_chats: 200,
                max_child_profiles: 5,
                save_history_days: 365,
            },
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Plus => write!(f, "plus"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = PlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "plus" => Ok(Self::Plus),
            _ => Err(PlanParseError(s.to_string())),
        }
    }
}

/// Error parsing a plan string
#[derive(Debug, Clone)]
pub struct PlanParseError(pub String);

impl std::fmt::Display for PlanParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid plan: {}", self.0)
    }
}

impl std::error::Error for PlanParseError {}

// ============================================
// Feature Flags
// ============================================

/// Plan-gated features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BedtimeMode,
    LearningMode,
    SaveAndReplay,
    ParentDashboard,
    StoryPersonalization,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BedtimeMode => "bedtime_mode",
            Self::LearningMode => "learning_mode",
            Self::SaveAndReplay => "save_and_replay",
            Self::ParentDashboard => "parent_dashboard",
            Self::StoryPersonalization => "story_personalization",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = FeatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bedtime_mode" => Ok(Self::BedtimeMode),
            "learning_mode" => Ok(Self::LearningMode),
            "save_and_replay" => Ok(Self::SaveAndReplay),
            "parent_dashboard" => Ok(Self::ParentDashboard),
            "story_personalization" => Ok(Self::StoryPersonalization),
            _ => Err(FeatureParseError(s.to_string())),
        }
    }
}

/// Error parsing a feature name
#[derive(Debug, Clone)]
pub struct FeatureParseError(pub String);

impl std::fmt::Display for FeatureParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown feature: {}", self.0)
    }
}

impl std::error::Error for FeatureParseError {}

/// Pure lookup: is `feature` available on `plan`?
/// Every gated feature is Plus-only today.
pub const fn has_feature(plan: Plan, feature: Feature) -> bool {
    match feature {
        Feature::BedtimeMode
        | Feature::LearningMode
        | Feature::SaveAndReplay
        | Feature::ParentDashboard
        | Feature::StoryPersonalization => matches!(plan, Plan::Plus),
    }
}

// ============================================
// Gate Results
// ============================================

/// Result of an entitlement check
#[derive(Debug, Clone, Serialize)]
pub struct ChatGate {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChatGate {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Usage summary for the dashboard
#[derive(Debug, Serialize)]
pub struct UsageSummary {
    pub plan: Plan,
    pub daily_usage: i64,
    pub daily_limit: i64,
    pub remaining: i64,
    pub can_chat: bool,
}

// ============================================
// Pure Decision Cores
// ============================================

/// Decide whether a user at `usage` chats today may start another one.
/// Boundary: usage == limit denies, usage == limit - 1 allows.
pub fn chat_decision(plan: Plan, usage: i64) -> ChatGate {
    let limits = plan.limits();
    if usage >= limits.daily_chats {
        return match plan {
            Plan::Free => ChatGate::deny(
                "Daily limit reached. Upgrade to MiniMind Plus for unlimited chats!",
            ),
            Plan::Plus => {
                ChatGate::deny("Daily fair-use limit reached. Please try again tomorrow.")
            }
        };
    }
    ChatGate::allow()
}

/// Decide whether a user with `current_count` child profiles may add one.
pub fn profile_decision(plan: Plan, current_count: i64) -> ChatGate {
    let limits = plan.limits();
    if current_count >= limits.max_child_profiles {
        return match plan {
            Plan::Free => {
                ChatGate::deny("Upgrade to MiniMind Plus to create up to 5 child profiles!")
            }
            Plan::Plus => ChatGate::deny("Maximum child profiles reached for your plan."),
        };
    }
    ChatGate::allow()
}

// ============================================
// Persistence-Backed Operations
// ============================================

/// Resolve a user's plan. An active Plus subscription wins; otherwise the
/// profile's plan field; otherwise Free. Never fails: missing rows and read
/// errors both resolve to Free (the most restrictive interpretation).
pub async fn resolve_plan(pool: &PgPool, user_id: &str) -> Plan {
    let subscription = sqlx::query(
        r#"
        SELECT plan
        FROM subscriptions
        WHERE user_id = $1
          AND status = 'active'
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await;

    match subscription {
        Ok(Some(row)) => {
            if row.get::<String, _>("plan") == "plus" {
                return Plan::Plus;
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Subscription lookup failed for {}: {}", user_id, e);
            return Plan::Free;
        }
    }

    let profile = sqlx::query("SELECT plan FROM profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await;

    match profile {
        Ok(Some(row)) => row
            .get::<String, _>("plan")
            .parse()
            .unwrap_or(Plan::Free),
        Ok(None) => Plan::Free,
        Err(e) => {
            tracing::warn!("Profile lookup failed for {}: {}", user_id, e);
            Plan::Free
        }
    }
}

/// Today's UTC day-bucket for usage counters.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Chat count for (user, date); 0 when the row is absent or the read fails.
pub async fn daily_usage(pool: &PgPool, user_id: &str, date: NaiveDate) -> i64 {
    let row = sqlx::query(
        r#"
        SELECT chat_count
        FROM usage_counters
        WHERE user_id = $1
          AND date = $2
        "#,
    )
    .bind(user_id)
    .bind(date)
    .fetch_optional(pool)
    .await;

    match row {
        Ok(Some(r)) => r.get::<i64, _>("chat_count"),
        Ok(None) => 0,
        Err(e) => {
            tracing::warn!("Usage lookup failed for {}: {}", user_id, e);
            0
        }
    }
}

/// Gate a generation request by the resolved plan's daily quota.
pub async fn can_chat(pool: &PgPool, user_id: &str) -> ChatGate {
    let plan = resolve_plan(pool, user_id).await;
    let usage = daily_usage(pool, user_id, today_utc()).await;
    chat_decision(plan, usage)
}

/// Increment today's counter for a user. The upsert is atomic at the row
/// level, so sequential or concurrent calls each add exactly one. A write
/// failure is logged and swallowed; undercounting is an accepted degradation
/// and must never fail the user-visible request.
pub async fn increment_usage(pool: &PgPool, user_id: &str) {
    let result = sqlx::query(
        r#"
        INSERT INTO usage_counters (user_id, date, chat_count)
        VALUES ($1, $2, 1)
        ON CONFLICT (user_id, date)
        DO UPDATE SET chat_count = usage_counters.chat_count + 1
        "#,
    )
    .bind(user_id)
    .bind(today_utc())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!("Failed to increment usage for {}: {}", user_id, e);
    }
}

/// Number of child profiles owned by a user; 0 on read failure.
pub async fn child_profile_count(pool: &PgPool, user_id: &str) -> i64 {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM child_profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await;

    match row {
        Ok(r) => r.get::<i64, _>("total"),
        Err(e) => {
            tracing::warn!("Child profile count failed for {}: {}", user_id, e);
            0
        }
    }
}

/// Gate child-profile creation by the plan's profile cap.
pub async fn can_create_child_profile(pool: &PgPool, user_id: &str) -> ChatGate {
    let plan = resolve_plan(pool, user_id).await;
    let count = child_profile_count(pool, user_id).await;
    profile_decision(plan, count)
}

/// One-call summary of plan + quota state for the dashboard.
pub async fn usage_summary(pool: &PgPool, user_id: &str) -> UsageSummary {
    let plan = resolve_plan(pool, user_id).await;
    let usage = daily_usage(pool, user_id, today_utc()).await;
    let limits = plan.limits();

    UsageSummary {
        plan,
        daily_usage: usage,
        daily_limit: limits.daily_chats,
        remaining: (limits.daily_chats - usage).max(0),
        can_chat: usage < limits.daily_chats,
    }
}

// ============================================
// Tests
// ============================================

// Run with `cargo test --features pg-tests`; needs DATABASE_URL pointing at
// a Postgres the sqlx test harness may create databases on.
#[cfg(all(test, feature = "pg-tests"))]
mod pg_tests {
    use super::*;

    async fn seed_user(pool: &PgPool, id: &str) {
        sqlx::query("INSERT INTO app_user (id, email) VALUES ($1, $2)")
            .bind(id)
            .bind(format!("{}@test.local", id))
            .execute(pool)
            .await
            .unwrap();
    }

    #[sqlx::test]
    async fn resolve_plan_defaults_to_free_with_no_rows(pool: PgPool) {
        assert_eq!(resolve_plan(&pool, "nobody").await, Plan::Free);
    }

    #[sqlx::test]
    async fn usage_counter_round_trip(pool: PgPool) {
        seed_user(&pool, "counter-user").await;

        assert_eq!(daily_usage(&pool, "counter-user", today_utc()).await, 0);

        increment_usage(&pool, "counter-user").await;
        increment_usage(&pool, "counter-user").await;

        // Reads back through the same column the upsert writes.
        assert_eq!(daily_usage(&pool, "counter-user", today_utc()).await, 2);

        let gate = can_chat(&pool, "counter-user").await;
        assert!(gate.allowed);
    }

    #[sqlx::test]
    async fn usage_is_scoped_per_user(pool: PgPool) {
        seed_user(&pool, "user-a").await;
        seed_user(&pool, "user-b").await;

        increment_usage(&pool, "user-a").await;

        assert_eq!(daily_usage(&pool, "user-a", today_utc()).await, 1);
        assert_eq!(daily_usage(&pool, "user-b", today_utc()).await, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_limits() {
        let limits = Plan::Free.limits();
        assert_eq!(limits.daily_chats, 5);
        assert_eq!(limits.max_child_profiles, 1);
        assert_eq!(limits.save_history_days, 0);
    }

    #[test]
    fn plus_plan_limits() {
        let limits = Plan::Plus.limits();
        assert_eq!(limits.daily_chats, 200);
        assert_eq!(limits.max_child_profiles, 5);
        assert_eq!(limits.save_history_days, 365);
    }

    #[test]
    fn feature_flags_free_vs_plus() {
        assert!(!has_feature(Plan::Free, Feature::BedtimeMode));
        assert!(has_feature(Plan::Plus, Feature::BedtimeMode));
        assert!(!has_feature(Plan::Free, Feature::SaveAndReplay));
        assert!(has_feature(Plan::Plus, Feature::LearningMode));
        assert!(!has_feature(Plan::Free, Feature::StoryPersonalization));
    }

    #[test]
    fn unknown_feature_name_fails_to_parse() {
        assert!("bedtime_mode".parse::<Feature>().is_ok());
        assert!("teleportation_mode".parse::<Feature>().is_err());
    }

    #[test]
    fn plan_parses_case_insensitively_and_rejects_garbage() {
        assert_eq!("plus".parse::<Plan>().unwrap(), Plan::Plus);
        assert_eq!("FREE".parse::<Plan>().unwrap(), Plan::Free);
        assert!("premium".parse::<Plan>().is_err());
    }

    #[test]
    fn chat_decision_boundaries() {
        // u == limit - 1 allows
        assert!(chat_decision(Plan::Free, 4).allowed);
        // u == limit denies
        assert!(!chat_decision(Plan::Free, 5).allowed);
        assert!(chat_decision(Plan::Plus, 199).allowed);
        assert!(!chat_decision(Plan::Plus, 200).allowed);
        assert!(chat_decision(Plan::Free, 0).allowed);
    }

    #[test]
    fn chat_denial_reasons_differ_by_plan() {
        let free = chat_decision(Plan::Free, 5);
        let plus = chat_decision(Plan::Plus, 200);
        assert!(free.reason.unwrap().contains("Upgrade"));
        assert!(plus.reason.unwrap().contains("fair-use"));
    }

    #[test]
    fn profile_decision_respects_plan_caps() {
        // Free user with one profile cannot add a second
        assert!(profile_decision(Plan::Free, 0).allowed);
        assert!(!profile_decision(Plan::Free, 1).allowed);
        // Plus user may have up to five
        assert!(profile_decision(Plan::Plus, 4).allowed);
        assert!(!profile_decision(Plan::Plus, 5).allowed);
    }

    #[test]
    fn profile_denial_reasons_differ_by_plan() {
        let free = profile_decision(Plan::Free, 1);
        let plus = profile_decision(Plan::Plus, 5);
        assert!(free.reason.unwrap().contains("Upgrade"));
        assert!(plus.reason.unwrap().contains("Maximum"));
    }
}
