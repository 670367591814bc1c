//! Cooperative cancellation scopes.
//!
//! A [`Scope`] carries a cancellation signal, an optional deadline and keyed
//! values down a tree of work. Deriving a child never affects the parent;
//! cancelling a parent finishes every descendant.
//!
//! Deadlines are lazy: nothing is spawned when a scope is created. [`Scope::done`]
//! races the cancellation token against the deadline, and [`Scope::err`]
//! compares the deadline against the tokio clock, so paused-time tests see
//! expiry as soon as the clock is advanced.

use crate::error::ScopeError;
use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type ScopeValue = Arc<dyn Any + Send + Sync>;

struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    /// Why the scope finished, and when.
    finished: OnceLock<(ScopeError, Instant)>,
    value: Option<(&'static str, ScopeValue)>,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn child(
        parent: &Arc<Inner>,
        deadline: Option<Instant>,
        value: Option<(&'static str, ScopeValue)>,
    ) -> Self {
        Self {
            token: parent.token.child_token(),
            deadline,
            finished: OnceLock::new(),
            value,
            parent: Some(parent.clone()),
        }
    }

    fn expired_at(&self, now: Instant) -> Option<Instant> {
        self.deadline.filter(|d| now >= *d)
    }

    fn err(&self) -> Option<ScopeError> {
        self.finish().map(|(reason, _)| reason)
    }

    /// Resolves the reason and instant this scope finished, fixing both on
    /// first observation. An own deadline that passed before the ancestor
    /// finished wins over the inherited reason.
    fn finish(&self) -> Option<(ScopeError, Instant)> {
        if let Some(finished) = self.finished.get() {
            return Some(*finished);
        }

        let now = Instant::now();

        if let Some((inherited, at)) = self.parent.as_ref().and_then(|p| p.finish()) {
            let finished = match self.expired_at(at) {
                Some(deadline) => (ScopeError::DeadlineExceeded, deadline),
                None => (inherited, at),
            };
            return Some(*self.finished.get_or_init(|| finished));
        }

        if let Some(deadline) = self.expired_at(now) {
            let finished = *self
                .finished
                .get_or_init(|| (ScopeError::DeadlineExceeded, deadline));
            // Wake token observers and descendants
            self.token.cancel();
            return Some(finished);
        }

        if self.token.is_cancelled() {
            return Some(*self.finished.get_or_init(|| (ScopeError::Cancelled, now)));
        }

        None
    }

    fn cancel(&self) {
        let now = Instant::now();
        self.finished.get_or_init(|| match self.expired_at(now) {
            Some(deadline) => (ScopeError::DeadlineExceeded, deadline),
            None => (ScopeError::Cancelled, now),
        });
        self.token.cancel();
    }
}

/// A cancellation scope: deadline, done signal, terminal reason and keyed
/// values.
///
/// Cloning is cheap and every clone observes the same scope.
///
/// # Examples
///
/// ```
/// use dashalert_alert::scope::Scope;
/// use std::time::Duration;
///
/// let (host, shutdown) = Scope::root().with_cancel();
/// let (eval, _release) = host.with_timeout(Duration::from_secs(20));
/// assert!(eval.err().is_none());
///
/// shutdown.cancel();
/// assert!(eval.is_done());
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

impl Scope {
    /// A scope with no deadline that is only finished by cancelling a handle
    /// derived from it.
    pub fn root() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wraps an existing token, e.g. the host's shutdown token. Cancelling
    /// the token finishes the scope with [`ScopeError::Cancelled`].
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                deadline: None,
                finished: OnceLock::new(),
                value: None,
                parent: None,
            }),
        }
    }

    /// Derives a child that can be cancelled independently of `self`.
    pub fn with_cancel(&self) -> (Scope, CancelHandle) {
        self.with_deadline_opt(self.inner.deadline)
    }

    /// Derives a child whose deadline is the earlier of the parent's deadline
    /// and `now + timeout`. A timeout too large to represent adds no deadline
    /// of its own.
    pub fn with_timeout(&self, timeout: Duration) -> (Scope, CancelHandle) {
        let deadline = match (self.inner.deadline, Instant::now().checked_add(timeout)) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        self.with_deadline_opt(deadline)
    }

    fn with_deadline_opt(&self, deadline: Option<Instant>) -> (Scope, CancelHandle) {
        let inner = Arc::new(Inner::child(&self.inner, deadline, None));
        let handle = CancelHandle {
            inner: inner.clone(),
        };
        (Scope { inner }, handle)
    }

    /// Derives a child carrying `value` under `key`. The child shares the
    /// parent's deadline and has no cancel handle of its own.
    pub fn with_value<T>(&self, key: &'static str, value: T) -> Scope
    where
        T: Any + Send + Sync,
    {
        let value: ScopeValue = Arc::new(value);
        Scope {
            inner: Arc::new(Inner::child(
                &self.inner,
                self.inner.deadline,
                Some((key, value)),
            )),
        }
    }

    /// The instant at which this scope expires, if it has a deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
        // Fix the reason now that the scope is finished
        let _ = self.inner.err();
    }

    pub fn is_done(&self) -> bool {
        self.inner.err().is_some()
    }

    /// `None` while the scope is live, otherwise why it finished.
    pub fn err(&self) -> Option<ScopeError> {
        self.inner.err()
    }

    /// Looks `key` up on this scope and then on each ancestor. The nearest
    /// scope carrying `key` decides: a type mismatch there yields `None`.
    pub fn value<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut current = Some(&self.inner);
        while let Some(inner) = current {
            if let Some((k, v)) = &inner.value {
                if *k == key {
                    return v.clone().downcast::<T>().ok();
                }
            }
            current = inner.parent.as_ref();
        }
        None
    }

    /// The underlying token, for use in `tokio::select!`. It is cancelled on
    /// explicit cancellation and once an expired deadline has been observed;
    /// prefer [`Scope::done`] to also wake on the deadline itself.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.inner.err())
            .finish()
    }
}

/// Releases a scope derived with [`Scope::with_cancel`] or
/// [`Scope::with_timeout`]. Cancelling more than once is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Wraps the handle so the scope is released when the guard drops.
    pub fn into_guard(self) -> CancelGuard {
        CancelGuard { handle: self }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels its scope on drop.
#[derive(Debug)]
pub struct CancelGuard {
    handle: CancelHandle,
}

impl CancelGuard {
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.handle.is_cancelled() {
            tracing::trace!("Releasing evaluation scope");
        }
        self.handle.cancel();
    }
}
