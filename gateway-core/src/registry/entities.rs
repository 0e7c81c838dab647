//! Entity types for the registry (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::crypto::SealedEnvelope;

/// A named principal that makes tool calls via the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub created_by: String,
    pub role: String,
    #[serde(with = "public_key_b64")]
    pub public_key: Vec<u8>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Disabled,
}

mod public_key_b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Generated once at agent creation; the private key is returned to the
/// caller exactly once and never stored.
pub struct AgentKeyPair {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl AgentKeyPair {
    pub fn generate() -> Self {
        use ed25519_dalek::SigningKey;
        let mut rng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut rng);
        Self {
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            private_key: signing_key.to_bytes().to_vec(),
        }
    }
}

/// The fixed, closed set of upstream tools (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Search,
    HttpFetch,
    Chat,
    SendMail,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Search => "search",
            Tool::HttpFetch => "http_fetch",
            Tool::Chat => "chat",
            Tool::SendMail => "send_mail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "search" => Some(Tool::Search),
            "http_fetch" => Some(Tool::HttpFetch),
            "chat" => Some(Tool::Chat),
            "send_mail" => Some(Tool::SendMail),
            _ => None,
        }
    }
}

/// A sealed tool credential. At most one non-revoked credential per tool is
/// "active" at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCredential {
    pub tool: Tool,
    pub encrypted_credential: SealedEnvelope,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ToolCredential {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Registry-side provenance record tying a `tokenId` to the hash of its
/// proof payload (§3, §4.9 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRegistryEntry {
    pub token_id: Uuid,
    pub agent_id: Uuid,
    pub payload_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
}

/// A guard clause narrowing when a policy's scopes actually apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Guards {
    pub max_request_size: Option<usize>,
    pub max_response_size: Option<usize>,
    pub allowed_domains: Option<HashSet<String>>,
    pub blocked_domains: Option<HashSet<String>>,
    pub pii_filters: Option<Vec<String>>,
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    /// `HH:MM` local time.
    pub start: String,
    pub end: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub action: String,
    pub limit: u64,
    pub window: QuotaWindow,
    #[serde(default)]
    pub reset_strategy: ResetStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "24h")]
    TwentyFourHours,
    #[serde(rename = "7d")]
    SevenDays,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStrategy {
    #[default]
    Sliding,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tz")]
    pub timezone: String,
    pub allowed_days: Option<HashSet<chrono::Weekday>>,
    pub allowed_hours: Option<HourRange>,
}

fn default_true() -> bool {
    true
}
fn default_tz() -> String {
    "UTC".to_string()
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: default_tz(),
            allowed_days: None,
            allowed_hours: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u8,
    pub end: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncateField {
    pub field: String,
    pub max_length: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseFilters {
    pub redact_fields: Option<Vec<String>>,
    pub truncate_fields: Option<Vec<TruncateField>>,
    pub block_patterns: Option<Vec<String>>,
}

/// The declarative record at the center of the policy engine (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    pub scopes: HashSet<String>,
    pub intent: Option<String>,
    #[serde(default)]
    pub guards: Guards,
    #[serde(default)]
    pub quotas: Vec<Quota>,
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub response_filters: ResponseFilters,
}

/// Which principal a [`PolicySpec`] is attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicyTarget {
    Agent(Uuid),
    Role(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAssignment {
    pub id: Uuid,
    pub target: PolicyTarget,
    pub spec: PolicySpec,
}

/// Append-only audit-visible record of one proxied call (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub corr_id: String,
    pub agent_id: Uuid,
    pub tool: String,
    pub action: String,
    pub response_time_ms: u64,
    pub status_code: u16,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Quota bucket state. Fixed windows keep only a count; sliding windows
/// additionally keep a ring of call timestamps so expired entries can be
/// dropped as time passes (§3, §5).
#[derive(Debug, Clone, Default)]
pub struct QuotaCounter {
    pub count: u64,
    pub timestamps: Vec<DateTime<Utc>>,
}

/// A mapping from configuration keys to string values, as read by
/// [`crate::config_manager`].
pub type ConfigMap = HashMap<String, String>;
