//! Downstream notifications fired on booking and show lifecycle events.
//!
//! Dispatch is fire-and-forget: callers never wait on delivery and never hold
//! a store lock while dispatching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::{BookingId, EventId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    #[serde(rename = "booking.confirmed", rename_all = "camelCase")]
    BookingConfirmed { booking_id: BookingId },
    #[serde(rename = "show.created", rename_all = "camelCase")]
    ShowCreated { event_id: EventId },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::BookingConfirmed { .. } => "booking.confirmed",
            Notification::ShowCreated { .. } => "show.created",
        }
    }
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification);
}

/// Writes notifications to the log only. Used when no downstream URL is configured.
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, notification: Notification) {
        info!(kind = notification.kind(), ?notification, "📣 Notification dispatched");
    }
}

/// Posts each notification as JSON to a downstream URL on a background task.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    url: String,
}

impl HttpDispatcher {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url: url.into() })
    }
}

impl NotificationDispatcher for HttpDispatcher {
    fn dispatch(&self, notification: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let kind = notification.kind();
            match client.post(&url).json(&notification).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(kind, "📣 Notification delivered");
                }
                Ok(resp) => {
                    warn!(kind, status = %resp.status(), "Notification endpoint returned an error status");
                }
                Err(e) => {
                    warn!(kind, error = %e, "Failed to deliver notification");
                }
            }
        });
    }
}
