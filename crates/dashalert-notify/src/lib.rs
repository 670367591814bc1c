//! Notifier-side rendering of evaluation results.
//!
//! A frozen [`EvalResult`](dashalert_alert::EvalResult) is turned into an
//! [`AlertNotification`], which channels render either through a body
//! template or as a chat-attachment style JSON payload. Delivery and routing
//! belong to the [`NotificationChannel`] implementations.

pub mod message;


pub use message::AlertNotification;

use anyhow::Result;
use async_trait::async_trait;

/// A notification delivery channel that sends rendered alerts to an external
/// service (e.g., chat webhook, email).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the notification through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    async fn send(&self, notification: &AlertNotification) -> Result<()>;

    /// Returns the channel type name (e.g., `"webhook"`).
    fn channel_name(&self) -> &str;
}
