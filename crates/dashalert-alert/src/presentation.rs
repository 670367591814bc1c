//! User-facing fields derived from an evaluation: state color and label,
//! notification title and elapsed time.

use chrono::{DateTime, Utc};
use dashalert_common::types::{AlertState, Rule};
use serde::Serialize;

/// Color and label used to render a rule state.
///
/// # Examples
///
/// ```
/// use dashalert_alert::presentation::StateDescription;
/// use dashalert_common::types::AlertState;
///
/// let model = StateDescription::for_state(AlertState::Alerting);
/// assert_eq!(model.color, "#D63232");
/// assert_eq!(model.text, "Alerting");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateDescription {
    pub color: String,
    pub text: String,
    pub data: String,
}

impl StateDescription {
    fn new(color: &str, text: &str) -> Self {
        Self {
            color: color.to_string(),
            text: text.to_string(),
            data: String::new(),
        }
    }

    /// # Panics
    ///
    /// Panics for states without a presentation (`paused`, `pending`).
    pub fn for_state(state: AlertState) -> Self {
        match state {
            AlertState::Ok => Self::new("#36a64f", "OK"),
            AlertState::NoData => Self::new("#888888", "No Data"),
            AlertState::ExecError => Self::new("#000", "Execution Error"),
            AlertState::Alerting => Self::new("#D63232", "Alerting"),
            other => panic!("Unknown rule state {other}"),
        }
    }
}

/// `"[<state label>] <rule name>"`.
pub fn notification_title(state: AlertState, rule_name: &str) -> String {
    format!("[{}] {}", StateDescription::for_state(state).text, rule_name)
}

/// Milliseconds from `start` to `end`, negative if `end` is earlier.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1_000_000.0,
        // Beyond ~292 years of nanoseconds
        None => delta.num_milliseconds() as f64,
    }
}

/// Presentation helpers shared by a live [`EvalContext`](crate::context::EvalContext)
/// and a frozen [`EvalResult`](crate::result::EvalResult).
pub trait Presentable {
    fn rule(&self) -> &Rule;

    fn start_time(&self) -> DateTime<Utc>;

    /// `None` until the evaluator has finished.
    fn end_time(&self) -> Option<DateTime<Utc>>;

    /// # Panics
    ///
    /// See [`StateDescription::for_state`].
    fn state_model(&self) -> StateDescription {
        StateDescription::for_state(self.rule().state)
    }

    fn notification_title(&self) -> String {
        notification_title(self.rule().state, &self.rule().name)
    }

    /// Evaluation wall time in milliseconds; `0.0` while no end time is set.
    fn duration_ms(&self) -> f64 {
        match self.end_time() {
            Some(end) => elapsed_ms(self.start_time(), end),
            None => 0.0,
        }
    }
}
