//! Out-of-band alerting.
//!
//! Critical failures are placed on a bounded channel and delivered by
//! [`alert_worker`], so raising an alert never blocks or fails a request.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Severity;
use crate::slack::send_to_slack;

#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    pub correlation_id: Uuid,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: Severity, title: impl Into<String>, detail: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            severity,
            title: title.into(),
            detail: detail.into(),
            correlation_id,
            raised_at: Utc::now(),
        }
    }
}

/// Cloneable handle for queueing alerts.
#[derive(Clone, Debug)]
pub struct AlertSender {
    tx: mpsc::Sender<Alert>,
}

impl AlertSender {
    /// Queues an alert without waiting. A full or closed queue drops the alert
    /// after logging it.
    pub fn raise(&self, alert: Alert) {
        if let Err(e) = self.tx.try_send(alert) {
            warn!("Dropping alert, queue unavailable: {}", e);
        }
    }
}

pub fn alert_channel(capacity: usize) -> (AlertSender, mpsc::Receiver<Alert>) {
    let (tx, rx) = mpsc::channel(capacity);
    (AlertSender { tx }, rx)
}

/// Slack destination for alerts.
#[derive(Debug, Clone)]
pub struct SlackTarget {
    pub token: String,
    pub channel: String,
}

/// Drains the alert queue until every sender is dropped.
pub async fn alert_worker(mut rx: mpsc::Receiver<Alert>, slack: Option<SlackTarget>) {
    info!("alert worker started (slack delivery {})", if slack.is_some() { "enabled" } else { "disabled" });

    while let Some(alert) = rx.recv().await {
        error!(
            "ALERT [{:?}] {} (correlation {}): {}",
            alert.severity, alert.title, alert.correlation_id, alert.detail
        );

        if let Some(target) = &slack {
            let headline = format!("{:?}: {}", alert.severity, alert.title);
            let detail = format!(
                "{}\n_correlation id_: `{}` at {}",
                alert.detail,
                alert.correlation_id,
                alert.raised_at.to_rfc3339()
            );
            send_to_slack(&headline, &detail, &target.token, &target.channel).await;
        }
    }

    info!("alert worker stopped");
}
