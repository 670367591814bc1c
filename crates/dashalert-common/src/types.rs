use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current verdict of an alert rule.
///
/// # Examples
///
/// ```
/// use dashalert_common::types::AlertState;
///
/// let state: AlertState = "no_data".parse().unwrap();
/// assert_eq!(state, AlertState::NoData);
/// assert_eq!(AlertState::ExecError.to_string(), "execution_error");
/// assert!("flapping".parse::<AlertState>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertState {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "no_data")]
    NoData,
    #[serde(rename = "execution_error")]
    ExecError,
    #[serde(rename = "alerting")]
    Alerting,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "pending")]
    Pending,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Ok => "ok",
            AlertState::NoData => "no_data",
            AlertState::ExecError => "execution_error",
            AlertState::Alerting => "alerting",
            AlertState::Paused => "paused",
            AlertState::Pending => "pending",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ok" => Ok(AlertState::Ok),
            "no_data" => Ok(AlertState::NoData),
            "execution_error" => Ok(AlertState::ExecError),
            "alerting" => Ok(AlertState::Alerting),
            "paused" => Ok(AlertState::Paused),
            "pending" => Ok(AlertState::Pending),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// A configured dashboard alert, as seen by a single evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    /// Free-text message configured on the rule, rendered by notifiers.
    #[serde(default)]
    pub message: String,
    pub state: AlertState,
    pub dashboard_id: i64,
    pub panel_id: i64,
}

/// A series value that satisfied a rule condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMatch {
    pub metric: String,
    /// `None` when the series reported a null value.
    pub value: Option<f64>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl EvalMatch {
    pub fn new(metric: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            metric: metric.into(),
            value,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Diagnostic breadcrumb recorded during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultLogEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResultLogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Format a tag map into a human-readable string.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use dashalert_common::types::format_tags;
///
/// let mut tags = HashMap::new();
/// tags.insert("host".to_string(), "web-01".to_string());
/// tags.insert("dc".to_string(), "eu".to_string());
/// assert_eq!(format_tags(&tags), "dc=eu, host=web-01");
/// ```
pub fn format_tags(tags: &HashMap<String, String>) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}
