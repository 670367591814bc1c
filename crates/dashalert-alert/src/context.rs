use crate::config::AlertServices;
use crate::dashboard::DashboardLink;
use crate::error::{Result, ScopeError};
use crate::presentation::Presentable;
use crate::result::EvalResult;
use crate::scope::{CancelGuard, CancelHandle, Scope};
use chrono::{DateTime, Utc};
use dashalert_common::types::{AlertState, EvalMatch, ResultLogEntry, Rule};
use std::any::Any;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;

/// State carried through one evaluation attempt of a rule.
///
/// A context is owned by a single evaluator at a time. The evaluator records
/// its outcome through the setters below, then calls [`EvalContext::freeze`]
/// to hand a read-only [`EvalResult`] to notifiers.
///
/// The context is also a cancellation scope: it expires after the configured
/// evaluation timeout (20 seconds by default) or as soon as the parent scope
/// finishes, whichever comes first. Dropping the context releases the scope.
pub struct EvalContext {
    firing: bool,
    is_test_run: bool,
    eval_matches: Vec<EvalMatch>,
    logs: Vec<ResultLogEntry>,
    error: Option<anyhow::Error>,
    description: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    rule: Rule,
    no_data_found: bool,
    retry_count: u32,
    dashboard: DashboardLink,
    scope: Scope,
    cancel: CancelGuard,
    span: tracing::Span,
}

impl EvalContext {
    pub fn new(parent: &Scope, rule: Rule, services: &AlertServices) -> Self {
        let (scope, cancel) = parent.with_timeout(services.evaluation_timeout());
        let span = tracing::info_span!(
            "alerting.evalContext",
            rule_id = rule.id,
            rule_name = %rule.name,
        );

        Self {
            firing: false,
            is_test_run: false,
            eval_matches: Vec::new(),
            logs: Vec::new(),
            error: None,
            description: String::new(),
            start_time: Utc::now(),
            end_time: None,
            rule,
            no_data_found: false,
            retry_count: 0,
            dashboard: DashboardLink::new(
                services.dashboards().clone(),
                services.app_url().clone(),
            ),
            scope,
            cancel: cancel.into_guard(),
            span,
        }
    }

    /// Marks the evaluation as a test run; downstream collaborators skip
    /// persistence and notification side effects.
    pub fn test_run(mut self) -> Self {
        self.is_test_run = true;
        self
    }

    // ---- evaluator writes ----

    pub fn set_firing(&mut self, firing: bool) {
        self.firing = firing;
    }

    pub fn push_match(&mut self, eval_match: EvalMatch) {
        self.eval_matches.push(eval_match);
    }

    pub fn push_log(&mut self, entry: ResultLogEntry) {
        self.logs.push(entry);
    }

    pub fn set_error(&mut self, error: anyhow::Error) {
        tracing::debug!(parent: &self.span, error = %error, "Evaluation failed");
        self.error = Some(error);
    }

    pub fn mark_no_data(&mut self) {
        self.no_data_found = true;
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_rule_state(&mut self, state: AlertState) {
        self.rule.state = state;
    }

    /// Stamps the end of the evaluation with the current time.
    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn set_end_time(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
    }

    /// Called by the scheduler before re-running the evaluation.
    pub fn increment_retry(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        tracing::debug!(parent: &self.span, retry_count = self.retry_count, "Retrying evaluation");
        self.retry_count
    }

    // ---- reads ----

    pub fn firing(&self) -> bool {
        self.firing
    }

    pub fn is_test_run(&self) -> bool {
        self.is_test_run
    }

    pub fn eval_matches(&self) -> &[EvalMatch] {
        &self.eval_matches
    }

    pub fn logs(&self) -> &[ResultLogEntry] {
        &self.logs
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn no_data_found(&self) -> bool {
        self.no_data_found
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    // ---- dashboard link ----

    /// Slug of the dashboard owning the rule's panel, looked up once per
    /// evaluation.
    ///
    /// # Errors
    ///
    /// Propagates the metadata lookup error; nothing is cached on failure.
    pub async fn dashboard_slug(&mut self) -> Result<String> {
        self.dashboard
            .slug(&self.scope, self.rule.dashboard_id)
            .instrument(self.span.clone())
            .await
    }

    /// Deep link to the alert tab of the rule's panel.
    ///
    /// # Errors
    ///
    /// Propagates any slug lookup failure.
    pub async fn rule_url(&mut self) -> Result<String> {
        self.dashboard
            .rule_url(&self.scope, &self.rule)
            .instrument(self.span.clone())
            .await
    }

    pub fn cached_dashboard_slug(&self) -> Option<&str> {
        self.dashboard.cached_slug()
    }

    // ---- scope surface ----

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.scope.deadline()
    }

    pub async fn done(&self) {
        self.scope.done().await
    }

    pub fn is_done(&self) -> bool {
        self.scope.is_done()
    }

    pub fn err(&self) -> Option<ScopeError> {
        self.scope.err()
    }

    pub fn value<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.scope.value(key)
    }

    /// Releases the evaluation scope. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.handle().clone()
    }

    /// Ends the evaluator phase. Stamps the end time if the evaluator did
    /// not, and moves the outcome into a read-only result. The scope stays
    /// live until the result is dropped.
    pub fn freeze(self) -> EvalResult {
        let end_time = self.end_time.unwrap_or_else(Utc::now);

        tracing::debug!(
            parent: &self.span,
            firing = self.firing,
            matches = self.eval_matches.len(),
            no_data = self.no_data_found,
            has_error = self.error.is_some(),
            retry_count = self.retry_count,
            "Evaluation complete"
        );

        EvalResult {
            firing: self.firing,
            is_test_run: self.is_test_run,
            eval_matches: self.eval_matches,
            logs: self.logs,
            error: self.error,
            description: self.description,
            start_time: self.start_time,
            end_time,
            rule: self.rule,
            no_data_found: self.no_data_found,
            retry_count: self.retry_count,
            image_public_url: None,
            image_on_disk_path: None,
            dashboard: self.dashboard,
            scope: self.scope,
            cancel: self.cancel,
            span: self.span,
        }
    }
}

impl Presentable for EvalContext {
    fn rule(&self) -> &Rule {
        &self.rule
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("rule", &self.rule)
            .field("firing", &self.firing)
            .field("is_test_run", &self.is_test_run)
            .field("eval_matches", &self.eval_matches.len())
            .field("logs", &self.logs.len())
            .field("error", &self.error)
            .field("no_data_found", &self.no_data_found)
            .field("retry_count", &self.retry_count)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("scope", &self.scope)
            .finish()
    }
}
