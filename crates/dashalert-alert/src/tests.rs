use crate::config::{AlertServices, AlertingConfig};
use crate::context::EvalContext;
use crate::dashboard::{DashboardMetadata, InMemoryDashboards};
use crate::error::{DashboardError, ScopeError};
use crate::presentation::Presentable;
use crate::scope::Scope;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashalert_common::types::{AlertState, EvalMatch, ResultLogEntry, Rule};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn make_rule(name: &str, state: AlertState) -> Rule {
    Rule {
        id: 11,
        org_id: 1,
        name: name.to_string(),
        message: String::new(),
        state,
        dashboard_id: 3,
        panel_id: 2,
    }
}

fn services_with(dashboards: Arc<dyn DashboardMetadata>) -> AlertServices {
    let config = AlertingConfig {
        app_url: "https://host/".into(),
        ..Default::default()
    };
    AlertServices::new(config, dashboards)
}

fn services() -> AlertServices {
    let dashboards = InMemoryDashboards::new();
    dashboards.insert(3, "host-health");
    services_with(Arc::new(dashboards))
}

/// Replays scripted lookup results and counts calls.
struct ScriptedDashboards {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<String, DashboardError>>>,
}

impl ScriptedDashboards {
    fn new(responses: Vec<Result<String, DashboardError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(responses.into()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DashboardMetadata for ScriptedDashboards {
    async fn slug_by_id(&self, _dashboard_id: i64) -> Result<String, DashboardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DashboardError::Unavailable("script exhausted".into())))
    }
}

/// Never answers.
struct HangingDashboards;

#[async_trait]
impl DashboardMetadata for HangingDashboards {
    async fn slug_by_id(&self, _dashboard_id: i64) -> Result<String, DashboardError> {
        std::future::pending().await
    }
}

// ---- construction ----

#[tokio::test]
async fn new_context_starts_empty_and_live() {
    let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());

    assert!(ctx.start_time().timestamp() > 0);
    assert!(ctx.end_time().is_none());
    assert!(ctx.eval_matches().is_empty());
    assert!(ctx.logs().is_empty());
    assert_eq!(ctx.retry_count(), 0);
    assert!(!ctx.firing());
    assert!(!ctx.is_test_run());
    assert!(ctx.error().is_none());
    assert!(ctx.cached_dashboard_slug().is_none());
    assert!(ctx.err().is_none());
    assert!(!ctx.is_done());
    assert!(!ctx.cancel_handle().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn deadline_is_twenty_seconds_under_open_parent() {
    let start = Instant::now();
    let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    assert_eq!(ctx.deadline(), Some(start + Duration::from_secs(20)));
}

#[tokio::test(start_paused = true)]
async fn deadline_inherits_tighter_parent() {
    let start = Instant::now();
    let (parent, _release) = Scope::root().with_timeout(Duration::from_secs(5));
    let ctx = EvalContext::new(&parent, make_rule("cpu", AlertState::Ok), &services());
    assert_eq!(ctx.deadline(), Some(start + Duration::from_secs(5)));

    let (loose, _release) = Scope::root().with_timeout(Duration::from_secs(60));
    let ctx = EvalContext::new(&loose, make_rule("cpu", AlertState::Ok), &services());
    assert_eq!(ctx.deadline(), Some(start + Duration::from_secs(20)));
}

#[tokio::test]
async fn cancelling_parent_finishes_context_promptly() {
    let (host, shutdown) = Scope::root().with_cancel();
    let ctx = EvalContext::new(&host, make_rule("cpu", AlertState::Ok), &services());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_millis(50), ctx.done())
        .await
        .expect("context should finish with its parent");
    assert_eq!(ctx.err(), Some(ScopeError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_after_twenty_seconds() {
    let start = Instant::now();
    let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());

    ctx.done().await;

    let waited = Instant::now() - start;
    assert!(waited >= Duration::from_secs(20));
    assert!(waited <= Duration::from_secs(21));
    assert_eq!(ctx.err(), Some(ScopeError::DeadlineExceeded));

    // Still callable after expiry
    ctx.cancel();
    ctx.cancel();
    assert_eq!(ctx.err(), Some(ScopeError::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn expired_context_keeps_deadline_reason_after_host_shutdown() {
    let (host, shutdown) = Scope::root().with_cancel();
    let ctx = EvalContext::new(&host, make_rule("cpu", AlertState::Ok), &services());

    tokio::time::advance(Duration::from_secs(25)).await;
    shutdown.cancel();

    assert_eq!(host.err(), Some(ScopeError::Cancelled));
    assert_eq!(ctx.err(), Some(ScopeError::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn host_shutdown_before_deadline_reports_cancelled() {
    let (host, shutdown) = Scope::root().with_cancel();
    let ctx = EvalContext::new(&host, make_rule("cpu", AlertState::Ok), &services());

    tokio::time::advance(Duration::from_secs(5)).await;
    shutdown.cancel();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(ctx.err(), Some(ScopeError::Cancelled));
}

#[tokio::test]
async fn oversized_timeout_does_not_panic() {
    let config = AlertingConfig {
        evaluation_timeout_secs: u64::MAX,
        ..Default::default()
    };
    let services = AlertServices::new(config, Arc::new(InMemoryDashboards::new()));

    let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services);
    assert!(ctx.deadline().is_none());
    assert!(ctx.err().is_none());

    let (parent, _release) = Scope::root().with_timeout(Duration::from_secs(5));
    let ctx = EvalContext::new(&parent, make_rule("cpu", AlertState::Ok), &services);
    assert_eq!(ctx.deadline(), parent.deadline());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    ctx.cancel();
    ctx.cancel();
    ctx.cancel_handle().cancel();
    assert_eq!(ctx.err(), Some(ScopeError::Cancelled));
    ctx.done().await;
}

#[tokio::test]
async fn dropping_context_releases_scope() {
    let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    let scope = ctx.scope().clone();
    drop(ctx);
    assert_eq!(scope.err(), Some(ScopeError::Cancelled));
}

#[tokio::test]
async fn context_forwards_scope_values() {
    let parent = Scope::root().with_value("org_id", 42i64);
    let ctx = EvalContext::new(&parent, make_rule("cpu", AlertState::Ok), &services());
    assert_eq!(ctx.value::<i64>("org_id").as_deref(), Some(&42));
    assert!(ctx.value::<i64>("user_id").is_none());
}

// ---- presentation ----

#[tokio::test]
async fn state_models_match_table() {
    let cases = [
        (AlertState::Ok, "#36a64f", "OK"),
        (AlertState::NoData, "#888888", "No Data"),
        (AlertState::ExecError, "#000", "Execution Error"),
        (AlertState::Alerting, "#D63232", "Alerting"),
    ];
    for (state, color, text) in cases {
        let ctx = EvalContext::new(&Scope::root(), make_rule("cpu", state), &services());
        let model = ctx.state_model();
        assert_eq!(model.color, color, "color for {state}");
        assert_eq!(model.text, text, "text for {state}");
        assert!(model.data.is_empty());
    }
}

#[test]
#[should_panic(expected = "Unknown rule state paused")]
fn state_model_panics_outside_table() {
    let mut ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    ctx.set_rule_state(AlertState::Paused);
    ctx.state_model();
}

#[tokio::test]
async fn notification_title_is_label_then_name() {
    let ctx = EvalContext::new(
        &Scope::root(),
        make_rule("web latency", AlertState::ExecError),
        &services(),
    );
    assert_eq!(ctx.notification_title(), "[Execution Error] web latency");
}

#[tokio::test]
async fn duration_uses_whole_interval() {
    let mut ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    assert_eq!(ctx.duration_ms(), 0.0);
    let end = ctx.start_time() + ChronoDuration::milliseconds(1500);
    ctx.set_end_time(end);
    assert_eq!(ctx.duration_ms(), 1500.0);
}

// ---- dashboard slug ----

#[tokio::test]
async fn slug_is_looked_up_once() {
    let dashboards = ScriptedDashboards::new(vec![Ok("my-dash".into())]);
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Ok),
        &services_with(dashboards.clone()),
    );

    assert_eq!(ctx.dashboard_slug().await.unwrap(), "my-dash");
    assert_eq!(ctx.dashboard_slug().await.unwrap(), "my-dash");
    assert_eq!(dashboards.calls(), 1);
    assert_eq!(ctx.cached_dashboard_slug(), Some("my-dash"));
}

#[tokio::test]
async fn slug_failure_is_not_cached() {
    let dashboards = ScriptedDashboards::new(vec![
        Err(DashboardError::Unavailable("db down".into())),
        Ok("my-dash".into()),
    ]);
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Ok),
        &services_with(dashboards.clone()),
    );

    assert!(ctx.dashboard_slug().await.is_err());
    assert!(ctx.cached_dashboard_slug().is_none());
    assert_eq!(ctx.dashboard_slug().await.unwrap(), "my-dash");
    assert_eq!(dashboards.calls(), 2);
}

#[tokio::test]
async fn empty_slug_is_not_memoized() {
    let dashboards = ScriptedDashboards::new(vec![Ok(String::new()), Ok("late".into())]);
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Ok),
        &services_with(dashboards.clone()),
    );

    assert_eq!(ctx.dashboard_slug().await.unwrap(), "");
    assert_eq!(ctx.dashboard_slug().await.unwrap(), "late");
    assert_eq!(dashboards.calls(), 2);
}

#[tokio::test]
async fn rule_url_composes_base_slug_and_panel() {
    let dashboards = ScriptedDashboards::new(vec![Ok("my-dash".into())]);
    let mut rule = make_rule("cpu", AlertState::Alerting);
    rule.panel_id = 7;
    let mut ctx = EvalContext::new(&Scope::root(), rule, &services_with(dashboards));

    assert_eq!(
        ctx.rule_url().await.unwrap(),
        "https://host/dashboard/db/my-dash?fullscreen&edit&tab=alert&panelId=7"
    );
}

#[tokio::test]
async fn slug_lookup_is_aborted_by_finished_scope() {
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Ok),
        &services_with(Arc::new(HangingDashboards)),
    );
    ctx.cancel();

    let err = ctx.dashboard_slug().await.unwrap_err();
    assert!(matches!(err, DashboardError::Aborted(ScopeError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn hanging_lookup_gives_up_at_deadline() {
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Ok),
        &services_with(Arc::new(HangingDashboards)),
    );

    let err = ctx.rule_url().await.unwrap_err();
    assert!(matches!(err, DashboardError::Aborted(ScopeError::DeadlineExceeded)));
}

// ---- end-to-end ----

#[tokio::test]
async fn ok_evaluation_end_to_end() {
    let mut ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    let end = ctx.start_time() + ChronoDuration::milliseconds(10);
    ctx.set_end_time(end);

    assert_eq!(ctx.notification_title(), "[OK] cpu");
    assert_eq!(ctx.duration_ms(), 10.0);
    assert_eq!(ctx.dashboard_slug().await.unwrap(), "host-health");
    assert_eq!(
        ctx.rule_url().await.unwrap(),
        "https://host/dashboard/db/host-health?fullscreen&edit&tab=alert&panelId=2"
    );
    ctx.cancel();
}

#[tokio::test]
async fn alerting_keeps_matches_and_logs_in_order() {
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("disk", AlertState::Alerting),
        &services(),
    );
    ctx.push_log(ResultLogEntry::new("Condition[0]: query A"));
    ctx.push_match(EvalMatch::new("sda1", Some(97.5)).with_tag("host", "web-01"));
    ctx.push_log(ResultLogEntry::with_data(
        "Condition[0]: eval",
        serde_json::json!({ "firing": true }),
    ));
    ctx.push_match(EvalMatch::new("sdb1", Some(99.0)));
    ctx.set_firing(true);
    ctx.finish();

    assert_eq!(ctx.notification_title(), "[Alerting] disk");
    let metrics: Vec<&str> = ctx.eval_matches().iter().map(|m| m.metric.as_str()).collect();
    assert_eq!(metrics, ["sda1", "sdb1"]);
    assert_eq!(ctx.logs()[0].message, "Condition[0]: query A");
    assert_eq!(ctx.logs()[1].message, "Condition[0]: eval");

    let result = ctx.freeze();
    assert!(result.firing());
    assert_eq!(result.eval_matches().len(), 2);
    assert_eq!(result.eval_matches()[0].value, Some(97.5));
}

#[tokio::test]
async fn no_data_evaluation() {
    let mut ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::NoData), &services());
    ctx.mark_no_data();

    assert!(ctx.no_data_found());
    assert_eq!(ctx.state_model().color, "#888888");
    assert_eq!(ctx.notification_title(), "[No Data] cpu");
}

#[tokio::test]
async fn slug_failure_propagates_through_rule_url() {
    let dashboards = ScriptedDashboards::new(vec![Err(DashboardError::Unavailable(
        "db down".into(),
    ))]);
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Ok),
        &services_with(dashboards),
    );

    let err = ctx.rule_url().await.unwrap_err();
    assert!(matches!(&err, DashboardError::Unavailable(msg) if msg == "db down"));
    assert!(ctx.cached_dashboard_slug().is_none());
}

#[tokio::test]
async fn missing_dashboard_reports_not_found() {
    let rule = Rule {
        dashboard_id: 99,
        ..make_rule("cpu", AlertState::Ok)
    };
    let mut ctx = EvalContext::new(&Scope::root(), rule, &services());

    let err = ctx.rule_url().await.unwrap_err();
    assert!(matches!(err, DashboardError::NotFound { dashboard_id: 99 }));
}

// ---- retries and freezing ----

#[tokio::test]
async fn retry_counter_increments() {
    let mut ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::Ok), &services());
    assert_eq!(ctx.increment_retry(), 1);
    assert_eq!(ctx.increment_retry(), 2);
    assert_eq!(ctx.retry_count(), 2);
}

#[tokio::test]
async fn freeze_keeps_outcome_and_scope() {
    let mut ctx = EvalContext::new(&Scope::root(), make_rule("cpu", AlertState::ExecError), &services())
        .test_run();
    ctx.set_error(anyhow::anyhow!("query timed out"));
    ctx.set_description("tsdb query failed");
    let start = ctx.start_time();

    let result = ctx.freeze();
    assert!(result.is_test_run());
    assert_eq!(result.error().unwrap().to_string(), "query timed out");
    assert_eq!(result.description(), "tsdb query failed");
    assert!(result.end_time().unwrap() >= start);
    assert!(result.duration_ms() >= 0.0);
    assert!(result.scope().err().is_none());

    let scope = result.scope().clone();
    drop(result);
    assert_eq!(scope.err(), Some(ScopeError::Cancelled));
}

#[tokio::test]
async fn result_carries_memoized_slug_and_image() {
    let dashboards = ScriptedDashboards::new(vec![Ok("my-dash".into())]);
    let mut ctx = EvalContext::new(
        &Scope::root(),
        make_rule("cpu", AlertState::Alerting),
        &services_with(dashboards.clone()),
    );
    ctx.dashboard_slug().await.unwrap();

    let mut result = ctx.freeze();
    assert_eq!(result.cached_dashboard_slug(), Some("my-dash"));
    assert!(result.rule_url().await.unwrap().contains("/dashboard/db/my-dash?"));
    assert_eq!(dashboards.calls(), 1);

    assert!(result.image_public_url().is_none());
    result.attach_image(
        Some("https://img.example.com/abc.png".into()),
        Some("/var/lib/dashalert/png/abc.png".into()),
    );
    assert_eq!(result.image_public_url(), Some("https://img.example.com/abc.png"));
    assert_eq!(
        result.image_on_disk_path().unwrap().to_str(),
        Some("/var/lib/dashalert/png/abc.png")
    );
}
