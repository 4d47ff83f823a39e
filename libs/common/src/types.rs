//! Wire and domain types shared across the client.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Auth Types ────────────────────────────────────────────────────────

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Authenticated user as returned by GET /auth/me.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    #[serde(rename = "full_name", default)]
    pub display_name: Option<String>,
    #[serde(rename = "is_superuser", default)]
    pub is_privileged: bool,
    #[serde(rename = "subscription_tier", default)]
    pub tier: SubscriptionTier,
    #[serde(rename = "subscription_status", default)]
    pub tier_status: SubscriptionStatus,
}

impl Identity {
    /// Display name, falling back to the email address.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.email,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Basic,
    Premium,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    #[default]
    Inactive,
    Trial,
    Cancelled,
    #[serde(other)]
    Other,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Other => "unknown",
        };
        f.write_str(label)
    }
}

/// Response from POST /auth/login.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Request body for POST /auth/register.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

// ── Market Types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Stock,
    Etf,
    Index,
    Forex,
    Commodity,
}

impl MarketType {
    pub const ALL: [MarketType; 5] = [
        MarketType::Stock,
        MarketType::Etf,
        MarketType::Index,
        MarketType::Forex,
        MarketType::Commodity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Stock => "stock",
            MarketType::Etf => "etf",
            MarketType::Index => "index",
            MarketType::Forex => "forex",
            MarketType::Commodity => "commodity",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MarketType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MarketType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| crate::Error::Other(format!("unknown market type: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningType {
    Minervini,
    AdxGoldenCross,
}

impl ScreeningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreeningType::Minervini => "minervini",
            ScreeningType::AdxGoldenCross => "adx_golden_cross",
        }
    }
}

impl fmt::Display for ScreeningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScreeningType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minervini" => Ok(ScreeningType::Minervini),
            "adx_golden_cross" | "adx-golden-cross" => Ok(ScreeningType::AdxGoldenCross),
            _ => Err(crate::Error::Other(format!("unknown screening type: {s}"))),
        }
    }
}

/// A market as returned by GET /markets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub market_type: MarketType,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

// ── Screening Types ───────────────────────────────────────────────────

/// Body for POST /markets/screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRequest {
    #[serde(rename = "type")]
    pub screening_type: ScreeningType,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl ScreeningRequest {
    /// A screen restricted to one market type.
    pub fn for_market_type(screening_type: ScreeningType, market_type: MarketType) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "market_type".to_string(),
            serde_json::Value::String(market_type.as_str().to_string()),
        );
        Self {
            screening_type,
            parameters,
        }
    }
}

/// Outcome of a single screen against one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningOutcome {
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub criteria_met: Vec<String>,
    /// Free-form indicator values; numbers and strings are both common.
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl ScreeningOutcome {
    /// `key: value` pairs joined for single-line display.
    pub fn details_line(&self) -> String {
        self.details
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(text) => format!("{k}: {text}"),
                other => format!("{k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub id: i64,
    pub market_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub screening_type: String,
    pub result_data: ScreeningOutcome,
    #[serde(default)]
    pub market: Option<Market>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A stored screen definition (GET/POST /markets/screens).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedScreen {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub screening_criteria: ScreeningRequest,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSavedScreen {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub screening_criteria: ScreeningRequest,
    pub is_public: bool,
}

// ── Summary Types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCounts {
    #[serde(default)]
    pub stock: u64,
    #[serde(default)]
    pub etf: u64,
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub forex: u64,
    #[serde(default)]
    pub commodity: u64,
}

/// Response from GET /markets/summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSummary {
    #[serde(default)]
    pub total_markets: u64,
    #[serde(default)]
    pub by_type: MarketCounts,
}

/// Response from GET /markets/screening-summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningSummary {
    #[serde(default)]
    pub total_screens: u64,
    #[serde(default)]
    pub recent_results: u64,
    #[serde(default)]
    pub active_screens: u64,
}
