use crate::dashboard::DashboardLink;
use crate::error::Result;
use crate::presentation::Presentable;
use crate::scope::{CancelGuard, Scope};
use chrono::{DateTime, Utc};
use dashalert_common::types::{EvalMatch, ResultLogEntry, Rule};
use std::path::{Path, PathBuf};
use tracing::Instrument;

/// Read-only outcome of an evaluation, produced by
/// [`EvalContext::freeze`](crate::context::EvalContext::freeze).
///
/// Evaluator outputs can no longer change. The renderer may still attach a
/// screenshot, and the dashboard slug may still be resolved for links.
/// Holds the evaluation scope until dropped, so notifier I/O can observe it.
pub struct EvalResult {
    pub(crate) firing: bool,
    pub(crate) is_test_run: bool,
    pub(crate) eval_matches: Vec<EvalMatch>,
    pub(crate) logs: Vec<ResultLogEntry>,
    pub(crate) error: Option<anyhow::Error>,
    pub(crate) description: String,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) end_time: DateTime<Utc>,
    pub(crate) rule: Rule,
    pub(crate) no_data_found: bool,
    pub(crate) retry_count: u32,
    pub(crate) image_public_url: Option<String>,
    pub(crate) image_on_disk_path: Option<PathBuf>,
    pub(crate) dashboard: DashboardLink,
    pub(crate) scope: Scope,
    pub(crate) cancel: CancelGuard,
    pub(crate) span: tracing::Span,
}

impl EvalResult {
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

    pub fn image_public_url(&self) -> Option<&str> {
        self.image_public_url.as_deref()
    }

    pub fn image_on_disk_path(&self) -> Option<&Path> {
        self.image_on_disk_path.as_deref()
    }

    /// Records where the renderer stored the panel screenshot.
    pub fn attach_image(&mut self, public_url: Option<String>, on_disk_path: Option<PathBuf>) {
        tracing::debug!(
            parent: &self.span,
            public_url = public_url.as_deref().unwrap_or("-"),
            "Panel image attached"
        );
        self.image_public_url = public_url;
        self.image_on_disk_path = on_disk_path;
    }

    /// See [`EvalContext::dashboard_slug`](crate::context::EvalContext::dashboard_slug).
    pub async fn dashboard_slug(&mut self) -> Result<String> {
        self.dashboard
            .slug(&self.scope, self.rule.dashboard_id)
            .instrument(self.span.clone())
            .await
    }

    /// See [`EvalContext::rule_url`](crate::context::EvalContext::rule_url).
    pub async fn rule_url(&mut self) -> Result<String> {
        self.dashboard
            .rule_url(&self.scope, &self.rule)
            .instrument(self.span.clone())
            .await
    }

    pub fn cached_dashboard_slug(&self) -> Option<&str> {
        self.dashboard.cached_slug()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Releases the evaluation scope before the result is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Presentable for EvalResult {
    fn rule(&self) -> &Rule {
        &self.rule
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn end_time(&self) -> Option<DateTime<Utc>> {
        Some(self.end_time)
    }
}

impl std::fmt::Debug for EvalResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalResult")
            .field("rule", &self.rule)
            .field("firing", &self.firing)
            .field("eval_matches", &self.eval_matches.len())
            .field("error", &self.error)
            .field("no_data_found", &self.no_data_found)
            .field("image_public_url", &self.image_public_url)
            .finish_non_exhaustive()
    }
}
