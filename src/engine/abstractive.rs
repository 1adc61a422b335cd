use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::state::{AttemptMachine, Step};
use super::{SummarizationEngine, Target};
use crate::config::SummarizationConfig;
use crate::cost::ModelSelection;
use crate::llm::{BackendError, GenerationParams, TextGenerator};
use crate::registry::{MetricsUpdate, ModelType, PROVIDER_LOCAL};
use crate::TARGET_ENGINE;

impl SummarizationEngine {
    /// Runs `job` against the selected backend, retrying and failing over as
    /// [`AttemptMachine`] dictates. `None` means every backend failed and the
    /// caller should degrade.
    pub(crate) async fn generate_with_fallback<F, Fut>(
        &self,
        config: &SummarizationConfig,
        selection: &ModelSelection,
        job: F,
    ) -> Option<(String, Target)>
    where
        F: Fn(Arc<dyn TextGenerator>, GenerationParams) -> Fut,
        Fut: Future<Output = Result<String, BackendError>>,
    {
        let model_type = ModelType::for_mode(config.mode);
        let mut machine = AttemptMachine::new(self.config.retry.max_attempts);
        let mut target = Target::from(selection);

        loop {
            let step = match self.generator_for(&target.provider) {
                None => {
                    warn!(target: TARGET_ENGINE, "No client configured for provider '{}'", target.provider);
                    machine.on_unavailable()
                }
                Some(generator) => {
                    let params = self.params_for(&target.model_id, config);
                    let started = Instant::now();
                    match job(generator, params).await {
                        // Replies that are nothing but preamble or labels are
                        // treated like an empty response.
                        Ok(text) if self.postprocessor.polish(&text, config).trim().is_empty() => {
                            warn!(target: TARGET_ENGINE, "{} reply from {} is empty after polishing: {:?}", target.provider, target.model_id, text);
                            machine.on_failure(&BackendError::EmptyResponse)
                        }
                        Ok(text) => {
                            machine.on_success();
                            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                            self.record_outcome(target.variant_id, true, Some(latency_ms)).await;
                            debug!(target: TARGET_ENGINE, "{} answered in {:.0}ms after {} primary attempt(s)", target.model_version, latency_ms, machine.primary_attempts());
                            return Some((text, target));
                        }
                        Err(e) => {
                            warn!(target: TARGET_ENGINE, "{} call to {} failed: {}", target.provider, target.model_id, e);
                            machine.on_failure(&e)
                        }
                    }
                }
            };

            match step {
                Step::Retry { attempt } => {
                    let delay = self.config.retry.delay_for(attempt - 1);
                    debug!(target: TARGET_ENGINE, "Retrying {} (attempt {}) in {:?}", target.model_id, attempt, delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Step::SwitchToFallback => {
                    self.record_outcome(target.variant_id, false, None).await;
                    match self.find_fallback(&target, model_type).await {
                        Some(next) => {
                            warn!(target: TARGET_ENGINE, "Switching from {} to fallback {}", target.model_version, next.model_version);
                            target = next;
                        }
                        None => {
                            machine.on_fallback_unavailable();
                            return None;
                        }
                    }
                }
                Step::DegradeToExtractive | Step::FailedTerminal | Step::Done => {
                    self.record_outcome(target.variant_id, false, None).await;
                    return None;
                }
            }
        }
    }

    /// Next backend to try after `failed`. Variants we have no client for
    /// are not usable; the registry is switched back in that case.
    async fn find_fallback(&self, failed: &Target, model_type: ModelType) -> Option<Target> {
        let candidate = match failed.variant_id {
            Some(failed_id) => match self.registry.fallback_model(failed_id, model_type).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    error!(target: TARGET_ENGINE, "Registry fallback lookup failed: {}", e);
                    None
                }
            },
            // Configured backends are not in the registry; fail over to the
            // active registry variant if it is a different model.
            None => match self.registry.get_active_model(model_type).await {
                Ok(active) => active.filter(|v| {
                    v.provider != failed.provider || v.backend_model_id != failed.model_id
                }),
                Err(e) => {
                    error!(target: TARGET_ENGINE, "Registry lookup failed: {}", e);
                    None
                }
            },
        }?;

        if candidate.provider == PROVIDER_LOCAL || self.generator_for(&candidate.provider).is_none() {
            warn!(target: TARGET_ENGINE, "Fallback {} uses provider '{}' which has no client", candidate.version_label(), candidate.provider);
            if let Some(failed_id) = failed.variant_id {
                if let Err(e) = self.registry.activate_model(failed_id).await {
                    warn!(target: TARGET_ENGINE, "Could not restore {}: {}", failed.model_version, e);
                }
            }
            return None;
        }

        Some(Target {
            provider: candidate.provider.clone(),
            model_id: candidate.backend_model_id.clone(),
            model_version: candidate.version_label(),
            variant_id: Some(candidate.id),
        })
    }

    async fn record_outcome(&self, variant_id: Option<Uuid>, success: bool, latency_ms: Option<f64>) {
        let Some(id) = variant_id else {
            return;
        };
        let update = MetricsUpdate {
            quality: None,
            success_rate: Some(if success { 1.0 } else { 0.0 }),
            latency_ms,
        };
        if let Err(e) = self.registry.update_metrics(id, &update).await {
            warn!(target: TARGET_ENGINE, "Failed to record outcome for model {}: {}", id, e);
        }
    }
}
