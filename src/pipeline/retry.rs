//! Bounded retry ladder with model fallback
//!
//! Each request climbs at most three rungs: two attempts with the requested
//! model, then one with the fallback model. An attempt fails if the session
//! cannot be acquired, the backend errors, or the result is rejected by the
//! quality gate. The first attempt that passes the gate wins.
//!
//! Failures are classified with [`BgRemovalError::is_retryable`]. Inference
//! errors and quality rejections climb to the next rung; a backend rejecting
//! the caller's input ends the ladder at once.

use crate::{
    error::{BgRemovalError, Result},
    pipeline::{
        executor::RemovalExecutor,
        quality::{QualityValidator, QualityVerdict},
    },
    session_cache::ModelSessionCache,
    types::{AttemptOutcome, AttemptRecord, ImageArtifact, MattingParams},
};
use instant::Instant;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Attempts made with the requested model before falling back
pub const REQUESTED_MODEL_ATTEMPTS: u8 = 2;

/// Hard cap on attempts per request
pub const MAX_ATTEMPTS: u8 = REQUESTED_MODEL_ATTEMPTS + 1;

/// Position in the attempt ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LadderState {
    /// About to run `attempt` (1-based) with `model`
    Attempting { model: String, attempt: u8 },
    /// `attempt` produced an accepted result
    Succeeded { attempt: u8 },
    /// Every attempt failed
    Failed,
}

impl LadderState {
    /// Initial state for a request
    #[must_use]
    pub fn start(requested_model: &str) -> Self {
        Self::Attempting {
            model: requested_model.to_string(),
            attempt: 1,
        }
    }

    /// Transition after the current attempt failed
    #[must_use]
    pub fn on_failure(self, fallback_model: &str) -> Self {
        match self {
            Self::Attempting { model, attempt } if attempt < REQUESTED_MODEL_ATTEMPTS => {
                Self::Attempting {
                    model,
                    attempt: attempt + 1,
                }
            },
            Self::Attempting { attempt, .. } if attempt < MAX_ATTEMPTS => Self::Attempting {
                model: fallback_model.to_string(),
                attempt: attempt + 1,
            },
            _ => Self::Failed,
        }
    }

    /// Transition after a failure that no further attempt can fix
    #[must_use]
    pub fn abort(self) -> Self {
        match self {
            Self::Attempting { .. } => Self::Failed,
            other => other,
        }
    }

    /// Transition after the current attempt was accepted
    #[must_use]
    pub fn on_success(self) -> Self {
        match self {
            Self::Attempting { attempt, .. } => Self::Succeeded { attempt },
            other => other,
        }
    }

    /// Whether the ladder has stopped
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Attempting { .. })
    }
}

/// Output of the attempt that passed the gate
#[derive(Debug, Clone)]
pub struct AcceptedAttempt {
    pub image: ImageArtifact,
    pub model: String,
    pub attempt: u8,
    pub fallback: bool,
}

/// Full record of one ladder run
#[derive(Debug, Clone)]
pub struct LadderReport {
    /// Terminal state
    pub state: LadderState,
    /// One entry per attempt, in order
    pub attempts: Vec<AttemptRecord>,
    /// Present exactly when `state` is `Succeeded`
    pub accepted: Option<AcceptedAttempt>,
}

impl LadderReport {
    /// Semicolon separated description of every attempt
    #[must_use]
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Convert into the accepted output or the terminal error
    ///
    /// # Errors
    /// - `Validation` when the backend rejected the input
    /// - `Exhausted` when no attempt was accepted
    pub fn into_result(self) -> Result<AcceptedAttempt> {
        if let Some(accepted) = self.accepted {
            return Ok(accepted);
        }
        if let Some(AttemptOutcome::InputRejected(reason)) =
            self.attempts.last().map(|record| &record.outcome)
        {
            return Err(BgRemovalError::validation(reason.clone()));
        }
        Err(BgRemovalError::Exhausted {
            attempts: self.attempts.len(),
            summary: self.summary(),
        })
    }
}

/// Drives executor and quality gate across the ladder
#[derive(Debug, Clone)]
pub struct RetryFallbackController {
    sessions: Arc<ModelSessionCache>,
    executor: RemovalExecutor,
    quality: QualityValidator,
    fallback_model: String,
}

impl RetryFallbackController {
    pub fn new<S: Into<String>>(
        sessions: Arc<ModelSessionCache>,
        executor: RemovalExecutor,
        quality: QualityValidator,
        fallback_model: S,
    ) -> Self {
        Self {
            sessions,
            executor,
            quality,
            fallback_model: fallback_model.into(),
        }
    }

    /// Model used by the final attempt
    #[must_use]
    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    /// Run the ladder for one image; attempts execute sequentially
    pub async fn run(
        &self,
        image: &ImageArtifact,
        requested_model: &str,
        matting: &MattingParams,
    ) -> LadderReport {
        let mut state = LadderState::start(requested_model);
        let mut attempts = Vec::with_capacity(usize::from(MAX_ATTEMPTS));
        let mut accepted = None;

        while let LadderState::Attempting { model, attempt } = &state {
            let (model, attempt) = (model.clone(), *attempt);
            let fallback = attempt > REQUESTED_MODEL_ATTEMPTS;
            let started = Instant::now();

            let outcome = self.attempt(image, &model, attempt, matting).await;

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(output) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        model: model.clone(),
                        fallback,
                        outcome: AttemptOutcome::Accepted,
                        elapsed_ms,
                    });
                    accepted = Some(AcceptedAttempt {
                        image: output,
                        model,
                        attempt,
                        fallback,
                    });
                    state = state.on_success();
                },
                Err(error) => {
                    let retryable = error.is_retryable();
                    warn!(
                        model = %model,
                        attempt,
                        stage = error.stage(),
                        retryable,
                        reason = %error,
                        "attempt failed"
                    );
                    attempts.push(AttemptRecord {
                        attempt,
                        model,
                        fallback,
                        outcome: AttemptOutcome::from(&error),
                        elapsed_ms,
                    });
                    state = if retryable {
                        state.on_failure(&self.fallback_model)
                    } else {
                        state.abort()
                    };
                },
            }
        }

        let report = LadderReport {
            state,
            attempts,
            accepted,
        };
        match &report.state {
            LadderState::Succeeded { attempt } => {
                info!(attempt, "background removal accepted");
            },
            _ => warn!(history = %report.summary(), "all attempts failed"),
        }
        report
    }

    #[instrument(skip(self, image, matting), fields(dimensions = %format!("{}x{}", image.width(), image.height())))]
    async fn attempt(
        &self,
        image: &ImageArtifact,
        model: &str,
        attempt: u8,
        matting: &MattingParams,
    ) -> Result<ImageArtifact> {
        let session = self.sessions.acquire(model).await.map_err(|e| {
            BgRemovalError::inference(model, format!("session unavailable: {}", e))
        })?;

        let output = self.executor.execute(&session, image, matting).await?;

        match self.quality.check(&output) {
            QualityVerdict::Accept => Ok(output),
            QualityVerdict::Reject(issue) => {
                Err(BgRemovalError::quality_rejected(model, issue.to_string()))
            },
        }
    }
}
