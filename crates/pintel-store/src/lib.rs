//! Remote row store gateway: reads, change feeds and connection config.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

mod memory;
mod rest;

pub use memory::MemoryGateway;
pub use rest::{diff_rows, select_url, RestGateway};

pub const CRATE_NAME: &str = "pintel-store";

/// Equality filter, the only predicate pushed down to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqFilter {
    pub column: String,
    pub value: Value,
}

impl EqFilter {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// True when `row[column]` equals the filter value.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }

    /// PostgREST operand, e.g. `eq.7`.
    pub fn operand(&self) -> String {
        match &self.value {
            Value::String(s) => format!("eq.{s}"),
            other => format!("eq.{other}"),
        }
    }
}

impl fmt::Display for EqFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.operand())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub new_row: Option<Value>,
    pub old_row: Option<Value>,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        table: impl Into<String>,
        kind: ChangeKind,
        new_row: Option<Value>,
        old_row: Option<Value>,
    ) -> Self {
        Self {
            table: table.into(),
            kind,
            new_row,
            old_row,
            received_at: Utc::now(),
        }
    }

    /// Whether either side of the change satisfies `filter`.
    pub fn touches(&self, filter: &EqFilter) -> bool {
        self.new_row.as_ref().is_some_and(|row| filter.matches(row))
            || self.old_row.as_ref().is_some_and(|row| filter.matches(row))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open change channel. Events stop once the channel is closed or the
/// receiver is dropped.
#[derive(Debug)]
pub struct ChangeFeed {
    pub id: ChannelId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway endpoint or access key is not configured")]
    Unconfigured,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding rows: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("expected at most one row, got {rows}")]
    Ambiguous { rows: usize },
}

/// Read and change-notification primitives of the hosted table store.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn select(&self, table: &str, filter: Option<&EqFilter>) -> Result<Vec<Value>, GatewayError>;

    /// Open a change channel; returns once the channel handshake completed.
    async fn channel(&self, table: &str, filter: Option<&EqFilter>) -> Result<ChangeFeed, GatewayError>;

    /// Close a channel. Unknown or already closed ids are ignored.
    fn close_channel(&self, id: ChannelId);
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: Option<String>,
    pub access_key: Option<String>,
    pub timeout: Duration,
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    /// Column used to pair rows between polls of the REST change feed.
    pub row_key_column: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            access_key: None,
            timeout: Duration::from_secs(20),
            max_concurrency: 16,
            poll_interval: Duration::from_millis(2000),
            row_key_column: "company_id".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; missing credentials only warn.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            url: non_empty("PINTEL_STORE_URL")
                .or_else(|| non_empty("SUPABASE_URL"))
                .map(|url| url.trim_end_matches('/').to_string()),
            access_key: non_empty("PINTEL_STORE_KEY").or_else(|| non_empty("SUPABASE_ANON_KEY")),
            timeout: non_empty("PINTEL_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_concurrency: non_empty("PINTEL_MAX_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrency),
            poll_interval: non_empty("PINTEL_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            row_key_column: defaults.row_key_column,
        };

        if !config.is_configured() {
            warn!(
                "store credentials not configured; set PINTEL_STORE_URL and PINTEL_STORE_KEY (every fetch will fail)"
            );
        }
        config
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.access_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_prefers_own_keys_and_falls_back() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://fallback.example.co/"),
            ("PINTEL_STORE_KEY", "anon"),
            ("PINTEL_POLL_INTERVAL_MS", "250"),
        ]));
        assert_eq!(config.url.as_deref(), Some("https://fallback.example.co"));
        assert_eq!(config.access_key.as_deref(), Some("anon"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert!(config.is_configured());
    }

    #[test]
    fn missing_credentials_leave_config_unconfigured() {
        let config = GatewayConfig::from_lookup(lookup(&[("PINTEL_STORE_URL", "  ")]));
        assert!(config.url.is_none());
        assert!(!config.is_configured());
    }

    #[test]
    fn eq_filter_renders_and_matches() {
        let filter = EqFilter::new("company_id", 7);
        assert_eq!(filter.to_string(), "company_id=eq.7");
        assert!(filter.matches(&json!({ "company_id": 7 })));
        assert!(!filter.matches(&json!({ "company_id": 8 })));
        assert_eq!(EqFilter::new("category", "IT").operand(), "eq.IT");
    }

    #[test]
    fn change_event_touches_either_side() {
        let filter = EqFilter::new("company_id", 3);
        let deleted = ChangeEvent::new("company_culture", ChangeKind::Delete, None, Some(json!({ "company_id": 3 })));
        assert!(deleted.touches(&filter));
        let other = ChangeEvent::new("company_culture", ChangeKind::Insert, Some(json!({ "company_id": 4 })), None);
        assert!(!other.touches(&filter));
    }
}
