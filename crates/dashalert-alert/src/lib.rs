//! Per-evaluation state for dashboard alert rules.
//!
//! An [`EvalContext`] is created by the scheduler for one evaluation attempt,
//! filled in by the condition evaluator, and frozen into an [`EvalResult`]
//! for notifiers. Both expose the presentation helpers of [`Presentable`]
//! and a rule deep link resolved through an injected
//! [`DashboardMetadata`](dashboard::DashboardMetadata) service.

pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod presentation;
pub mod result;
pub mod scope;

#[cfg(test)]
mod tests;

pub use config::{AlertServices, AlertingConfig};
pub use context::EvalContext;
pub use presentation::{Presentable, StateDescription};
pub use result::EvalResult;
pub use scope::Scope;
