/// Why a [`Scope`](crate::scope::Scope) is done.
///
/// Once observed, the reason of a scope never changes. Child scopes report
/// the reason of the nearest finished ancestor.
///
/// # Examples
///
/// ```rust
/// use dashalert_alert::error::ScopeError;
///
/// assert_eq!(ScopeError::DeadlineExceeded.to_string(), "Scope: deadline exceeded");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// The scope, or one of its ancestors, was cancelled explicitly.
    #[error("Scope: cancelled")]
    Cancelled,

    /// The scope's deadline passed before it was cancelled.
    #[error("Scope: deadline exceeded")]
    DeadlineExceeded,
}

/// Errors returned by a [`DashboardMetadata`](crate::dashboard::DashboardMetadata)
/// lookup and propagated unchanged by the slug and rule-URL helpers.
///
/// # Examples
///
/// ```rust
/// use dashalert_alert::error::DashboardError;
///
/// let err = DashboardError::NotFound { dashboard_id: 42 };
/// assert!(err.to_string().contains("42"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// No dashboard with the given ID exists.
    #[error("Dashboard: dashboard not found (id={dashboard_id})")]
    NotFound { dashboard_id: i64 },

    /// The metadata service could not be reached or refused the request.
    #[error("Dashboard: metadata service unavailable: {0}")]
    Unavailable(String),

    /// The evaluation scope finished before the lookup completed.
    #[error("Dashboard: lookup aborted: {0}")]
    Aborted(#[from] ScopeError),

    /// Any other failure reported by a metadata implementation.
    #[error("Dashboard: {0}")]
    Other(#[from] anyhow::Error),
}

/// Convenience `Result` alias for dashboard metadata operations.
pub type Result<T> = std::result::Result<T, DashboardError>;
