use chrono::{DateTime, Utc};
use dashalert_alert::error::Result;
use dashalert_alert::{EvalResult, Presentable};
use dashalert_common::types::{format_tags, AlertState, EvalMatch};
use serde::Serialize;
use serde_json::{json, Value};

const FOOTER: &str = "dashalert";

/// Everything a channel needs to render one alert.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub rule_id: i64,
    pub rule_name: String,
    pub state: AlertState,
    /// `"[<state label>] <rule name>"`
    pub title: String,
    pub color: String,
    /// The rule's configured message, or the evaluator's description when the
    /// rule has none.
    pub message: String,
    pub rule_url: String,
    pub image_url: Option<String>,
    pub matches: Vec<EvalMatch>,
    pub error: Option<String>,
    pub no_data: bool,
    pub is_test_run: bool,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlertNotification {
    /// Builds the notification for a finished evaluation, resolving the
    /// rule's deep link on the way.
    ///
    /// # Errors
    ///
    /// Propagates the dashboard slug lookup error unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the rule is in a state without a presentation (see
    /// [`StateDescription::for_state`](dashalert_alert::StateDescription::for_state)).
    pub async fn from_result(result: &mut EvalResult) -> Result<Self> {
        let rule_url = result.rule_url().await?;
        let state_model = result.state_model();
        let rule = result.rule();

        let message = if rule.message.is_empty() {
            result.description().to_string()
        } else {
            rule.message.clone()
        };

        Ok(Self {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            state: rule.state,
            title: result.notification_title(),
            color: state_model.color,
            message,
            rule_url,
            image_url: result.image_public_url().map(str::to_string),
            matches: result.eval_matches().to_vec(),
            error: result.error().map(|e| format!("{e:#}")),
            no_data: result.no_data_found(),
            is_test_run: result.is_test_run(),
            duration_ms: result.duration_ms(),
            timestamp: result.end_time().unwrap_or_else(Utc::now),
        })
    }

    /// Substitutes `{{placeholder}}` fields in a user-supplied body template.
    pub fn render_body(&self, template: &str) -> String {
        template
            .replace("{{title}}", &self.title)
            .replace("{{rule_name}}", &self.rule_name)
            .replace("{{state}}", self.state.as_str())
            .replace("{{message}}", &self.message)
            .replace("{{rule_url}}", &self.rule_url)
            .replace("{{image_url}}", self.image_url.as_deref().unwrap_or(""))
            .replace("{{error}}", self.error.as_deref().unwrap_or(""))
            .replace("{{matches}}", &self.matches_text())
            .replace("{{timestamp}}", &self.timestamp.to_rfc3339())
    }

    /// One `metric [tags]: value` line per match.
    pub fn matches_text(&self) -> String {
        self.matches
            .iter()
            .map(|m| format!("{}: {}", match_label(m), format_value(m.value)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Chat attachment payload (title, link, color, one field per match).
    pub fn to_json(&self) -> Value {
        let mut fields: Vec<Value> = self
            .matches
            .iter()
            .map(|m| {
                json!({
                    "title": match_label(m),
                    "value": format_value(m.value),
                    "short": true,
                })
            })
            .collect();

        if let Some(error) = &self.error {
            fields.push(json!({
                "title": "Error message",
                "value": error,
                "short": false,
            }));
        }

        let mut attachment = json!({
            "color": self.color,
            "title": self.title,
            "title_link": self.rule_url,
            "text": self.message,
            "fields": fields,
            "footer": if self.is_test_run { format!("{FOOTER} (test)") } else { FOOTER.to_string() },
            "ts": self.timestamp.timestamp(),
        });

        if let (Some(url), Some(obj)) = (&self.image_url, attachment.as_object_mut()) {
            obj.insert("image_url".to_string(), Value::String(url.clone()));
        }

        json!({ "attachments": [attachment] })
    }
}

fn match_label(m: &EvalMatch) -> String {
    let tags = format_tags(&m.tags);
    if tags.is_empty() {
        m.metric.clone()
    } else {
        format!("{} [{}]", m.metric, tags)
    }
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "null".to_string(),
    }
}
