use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{FeedbackEvent, FeedbackRecord, FeedbackStore, RetrainingExample, MAX_RATING};
use crate::registry::{MetricsUpdate, ModelRegistry};
use crate::TARGET_FEEDBACK;

/// Consumes feedback events until the manager is dropped: blends each rating
/// into the producing model's quality and queues retraining examples.
pub async fn feedback_worker(
    mut rx: mpsc::Receiver<FeedbackEvent>,
    store: Arc<dyn FeedbackStore>,
    registry: Arc<ModelRegistry>,
) {
    info!(target: TARGET_FEEDBACK, "feedback worker started");

    while let Some(event) = rx.recv().await {
        match event {
            FeedbackEvent::Received(record) => {
                process_feedback(&record, store.as_ref(), &registry).await;
            }
        }
    }

    info!(target: TARGET_FEEDBACK, "feedback worker stopped");
}

async fn process_feedback(record: &FeedbackRecord, store: &dyn FeedbackStore, registry: &ModelRegistry) {
    let source = match store.summary_source(record.summary_id).await {
        Ok(Some(source)) => source,
        Ok(None) => {
            warn!(target: TARGET_FEEDBACK, "Feedback {} refers to unknown summary {}", record.id, record.summary_id);
            return;
        }
        Err(e) => {
            error!(target: TARGET_FEEDBACK, "Failed to load summary {} for feedback {}: {}", record.summary_id, record.id, e);
            return;
        }
    };

    if let Some(model_id) = source.model_id {
        let update = MetricsUpdate {
            quality: Some(f64::from(record.rating) / f64::from(MAX_RATING)),
            ..MetricsUpdate::default()
        };
        match registry.update_metrics(model_id, &update).await {
            Ok(variant) => {
                debug!(target: TARGET_FEEDBACK, "Model {} quality now {:.3}", variant.version_label(), variant.quality)
            }
            Err(e) => warn!(target: TARGET_FEEDBACK, "Failed to update model {} from feedback: {}", model_id, e),
        }
    }

    if !record.wants_retraining() {
        return;
    }

    let (target_summary, reason) = match &record.edited_summary {
        Some(edit) => (edit.clone(), "user_edit"),
        None => (source.summary.clone(), "low_rating"),
    };
    let example = RetrainingExample {
        id: Uuid::new_v4(),
        summary_id: record.summary_id,
        source_text: source.source_text,
        target_summary,
        reason: reason.to_string(),
        created_at: Utc::now(),
    };
    match store.enqueue_retraining(&example).await {
        Ok(()) => info!(target: TARGET_FEEDBACK, "Queued retraining example {} ({}) for summary {}", example.id, reason, record.summary_id),
        Err(e) => error!(target: TARGET_FEEDBACK, "Failed to queue retraining example for summary {}: {}", record.summary_id, e),
    }
}
