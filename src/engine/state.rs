//! Request lifecycle and the retry/fallback decision logic.
//!
//! [`AttemptMachine`] does no I/O and never sleeps. The async driver reports
//! each outcome and performs whatever [`Step`] comes back, so the whole retry
//! policy can be tested without a backend or a clock.

use std::fmt;

use crate::llm::BackendError;

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validated,
    CacheHit,
    Admitted,
    Summarizing,
    Failed,
    Retry,
    FallbackBackend,
    Polishing,
    Evaluated,
    Done,
    FailedTerminal,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, FailedTerminal)
                | (Validated, CacheHit)
                | (Validated, Admitted)
                | (Validated, FailedTerminal)
                | (CacheHit, Done)
                | (Admitted, Summarizing)
                | (Admitted, FailedTerminal)
                | (Summarizing, Polishing)
                | (Summarizing, Failed)
                | (Failed, Retry)
                | (Failed, FallbackBackend)
                | (Failed, Summarizing)
                | (Failed, FailedTerminal)
                | (Retry, Summarizing)
                | (FallbackBackend, Summarizing)
                | (Polishing, Evaluated)
                | (Evaluated, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::FailedTerminal)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "received",
            PipelineState::Validated => "validated",
            PipelineState::CacheHit => "cache-hit",
            PipelineState::Admitted => "admitted",
            PipelineState::Summarizing => "summarizing",
            PipelineState::Failed => "failed",
            PipelineState::Retry => "retry",
            PipelineState::FallbackBackend => "fallback-backend",
            PipelineState::Polishing => "polishing",
            PipelineState::Evaluated => "evaluated",
            PipelineState::Done => "done",
            PipelineState::FailedTerminal => "failed-terminal",
        };
        f.write_str(name)
    }
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Call the primary backend again. `attempt` is 1-based and counts the
    /// call about to be made.
    Retry { attempt: u32 },
    /// Ask the registry for a fallback variant and call it once.
    SwitchToFallback,
    /// Give up on generation and summarize extractively.
    DegradeToExtractive,
    Done,
    FailedTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Primary,
    Fallback,
    Extractive,
    Finished,
}

#[derive(Debug, Clone)]
pub struct AttemptMachine {
    max_attempts: u32,
    primary_attempts: u32,
    phase: Phase,
}

impl AttemptMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            primary_attempts: 0,
            phase: Phase::Primary,
        }
    }

    pub fn on_success(&mut self) -> Step {
        self.phase = Phase::Finished;
        Step::Done
    }

    pub fn on_failure(&mut self, error: &BackendError) -> Step {
        match self.phase {
            Phase::Primary => {
                self.primary_attempts += 1;
                if error.is_retryable() && self.primary_attempts < self.max_attempts {
                    Step::Retry {
                        attempt: self.primary_attempts + 1,
                    }
                } else {
                    self.phase = Phase::Fallback;
                    Step::SwitchToFallback
                }
            }
            Phase::Fallback => {
                self.phase = Phase::Extractive;
                Step::DegradeToExtractive
            }
            Phase::Extractive | Phase::Finished => {
                self.phase = Phase::Finished;
                Step::FailedTerminal
            }
        }
    }

    /// The current backend cannot be called at all (no client configured).
    /// Treated like a non-retryable failure.
    pub fn on_unavailable(&mut self) -> Step {
        match self.phase {
            Phase::Primary => {
                self.primary_attempts += 1;
                self.phase = Phase::Fallback;
                Step::SwitchToFallback
            }
            Phase::Fallback => {
                self.phase = Phase::Extractive;
                Step::DegradeToExtractive
            }
            Phase::Extractive | Phase::Finished => {
                self.phase = Phase::Finished;
                Step::FailedTerminal
            }
        }
    }

    /// The registry had no usable fallback variant.
    pub fn on_fallback_unavailable(&mut self) -> Step {
        self.phase = Phase::Extractive;
        Step::DegradeToExtractive
    }

    pub fn primary_attempts(&self) -> u32 {
        self.primary_attempts
    }

    pub fn degraded(&self) -> bool {
        self.phase == Phase::Extractive
    }
}
