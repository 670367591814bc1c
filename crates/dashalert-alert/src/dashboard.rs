use crate::error::{DashboardError, Result, ScopeError};
use crate::scope::Scope;
use async_trait::async_trait;
use dashalert_common::types::Rule;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Read access to dashboard metadata owned by another service.
///
/// Implementations are shared by every evaluation running in the process
/// and must be safe to call concurrently.
#[async_trait]
pub trait DashboardMetadata: Send + Sync {
    /// Returns the URL slug of the dashboard with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::NotFound`] when the dashboard does not exist,
    /// or another variant when the lookup itself fails.
    async fn slug_by_id(&self, dashboard_id: i64) -> Result<String>;
}

/// Dashboard slugs held in memory, keyed by dashboard ID.
///
/// # Examples
///
/// ```
/// use dashalert_alert::dashboard::InMemoryDashboards;
///
/// let dashboards = InMemoryDashboards::new();
/// dashboards.insert_title(3, "Host Health");
/// assert_eq!(dashboards.get(3).as_deref(), Some("host-health"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDashboards {
    slugs: RwLock<HashMap<i64, String>>,
}

impl InMemoryDashboards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dashboard_id: i64, slug: impl Into<String>) {
        let mut slugs = self.slugs.write().unwrap_or_else(|e| e.into_inner());
        slugs.insert(dashboard_id, slug.into());
    }

    /// Stores the slug derived from a dashboard title.
    pub fn insert_title(&self, dashboard_id: i64, title: &str) {
        self.insert(dashboard_id, slugify(title));
    }

    pub fn remove(&self, dashboard_id: i64) -> bool {
        let mut slugs = self.slugs.write().unwrap_or_else(|e| e.into_inner());
        slugs.remove(&dashboard_id).is_some()
    }

    pub fn get(&self, dashboard_id: i64) -> Option<String> {
        let slugs = self.slugs.read().unwrap_or_else(|e| e.into_inner());
        slugs.get(&dashboard_id).cloned()
    }
}

#[async_trait]
impl DashboardMetadata for InMemoryDashboards {
    async fn slug_by_id(&self, dashboard_id: i64) -> Result<String> {
        self.get(dashboard_id)
            .ok_or(DashboardError::NotFound { dashboard_id })
    }
}

/// Converts a dashboard title into its URL slug.
///
/// Letters and digits are lowercased; every other run of characters becomes a
/// single `-`, with none at either end.
///
/// # Examples
///
/// ```
/// use dashalert_alert::dashboard::slugify;
///
/// assert_eq!(slugify("  CPU / Memory (prod) "), "cpu-memory-prod");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Builds the deep link that opens the alert tab of a rule's panel.
///
/// `app_url` is expected to end with `/`.
pub fn rule_url(app_url: &str, slug: &str, panel_id: i64) -> String {
    format!("{app_url}dashboard/db/{slug}?fullscreen&edit&tab=alert&panelId={panel_id}")
}

/// Per-evaluation dashboard slug cache and rule link builder.
///
/// The first successful non-empty lookup is kept for the lifetime of the
/// link; failures are never cached.
pub struct DashboardLink {
    metadata: Arc<dyn DashboardMetadata>,
    app_url: Arc<str>,
    slug: Option<String>,
}

impl DashboardLink {
    pub fn new(metadata: Arc<dyn DashboardMetadata>, app_url: Arc<str>) -> Self {
        Self {
            metadata,
            app_url,
            slug: None,
        }
    }

    /// The memoized slug, if one has been resolved.
    pub fn cached_slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    /// Resolves the slug of `dashboard_id`, consulting the metadata service
    /// only on the first successful call.
    ///
    /// # Errors
    ///
    /// Propagates the metadata service's error, or
    /// [`DashboardError::Aborted`] if `scope` finishes first.
    pub async fn slug(&mut self, scope: &Scope, dashboard_id: i64) -> Result<String> {
        if let Some(slug) = &self.slug {
            return Ok(slug.clone());
        }

        if let Some(reason) = scope.err() {
            return Err(DashboardError::Aborted(reason));
        }

        tracing::debug!(dashboard_id, "Resolving dashboard slug");

        let lookup = tokio::select! {
            biased;
            result = self.metadata.slug_by_id(dashboard_id) => result,
            _ = scope.done() => Err(DashboardError::Aborted(
                scope.err().unwrap_or(ScopeError::Cancelled),
            )),
        };

        match lookup {
            Ok(slug) => {
                if !slug.is_empty() {
                    self.slug = Some(slug.clone());
                }
                Ok(slug)
            }
            Err(e) => {
                tracing::warn!(dashboard_id, error = %e, "Dashboard slug lookup failed");
                Err(e)
            }
        }
    }

    /// Resolves the slug for `rule` and builds its deep link.
    ///
    /// # Errors
    ///
    /// Propagates any slug resolution failure unchanged.
    pub async fn rule_url(&mut self, scope: &Scope, rule: &Rule) -> Result<String> {
        let slug = self.slug(scope, rule.dashboard_id).await?;
        Ok(rule_url(&self.app_url, &slug, rule.panel_id))
    }
}

impl std::fmt::Debug for DashboardLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardLink")
            .field("app_url", &self.app_url)
            .field("slug", &self.slug)
            .finish()
    }
}
