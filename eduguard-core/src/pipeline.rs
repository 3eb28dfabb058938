//! The request pipeline: moderation, then retrieval, then multi-model fan-out.
//!
//! A run moves through `Moderating -> Retrieving -> Querying -> Done`, and may
//! end early in `Blocked` (unsafe verdict) or `Failed` (a collaborator error).
//!
//! Guarantees per run:
//! - the moderator and the retriever are each called at most once;
//! - no retrieval or answering happens after an unsafe verdict;
//! - every answerer receives the same `(prompt, context)` pair, concurrently;
//! - the fan-out waits for every answerer to settle, then either returns one
//!   answer per configured backend or fails with all backend failures sorted
//!   by identity. Partial results are never returned.
//!
//! The pipeline itself holds no per-run state, so concurrent `process` calls
//! are independent.

use crate::error::{BackendFailure, ConfigError, PipelineError, ServiceError};
use crate::moderation::Moderator;
use crate::observer::{NoOpObserver, PipelineObserver};
use crate::providers::Answerer;
use crate::retrieval::Retriever;
use crate::types::{AnswererId, PipelineResult, RunState, Stage};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity used by [`Pipeline::single`].
pub const SINGLE_ANSWERER_ID: &str = "default";

/// Orchestrates one moderator, one retriever and a fixed set of answerers.
pub struct Pipeline {
    moderator: Arc<dyn Moderator>,
    retriever: Arc<dyn Retriever>,
    answerers: BTreeMap<AnswererId, Arc<dyn Answerer>>,
    answer_timeout: Option<Duration>,
    observer: Arc<dyn PipelineObserver>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("answerers", &self.identities())
            .field("answer_timeout", &self.answer_timeout)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline over one or more identified answerers.
    ///
    /// Fails if no answerer is given or an identity appears twice.
    pub fn new<I>(
        moderator: Arc<dyn Moderator>,
        retriever: Arc<dyn Retriever>,
        answerers: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (AnswererId, Arc<dyn Answerer>)>,
    {
        let mut map = BTreeMap::new();
        for (identity, answerer) in answerers {
            if identity.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: "backend identity must not be blank".to_string(),
                });
            }
            if map.contains_key(&identity) {
                return Err(ConfigError::DuplicateBackend {
                    identity: identity.to_string(),
                });
            }
            map.insert(identity, answerer);
        }
        if map.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        Ok(Self {
            moderator,
            retriever,
            answerers: map,
            answer_timeout: None,
            observer: Arc::new(NoOpObserver),
        })
    }

    /// Create a pipeline with exactly one answerer, identified as [`SINGLE_ANSWERER_ID`].
    pub fn single(
        moderator: Arc<dyn Moderator>,
        retriever: Arc<dyn Retriever>,
        answerer: Arc<dyn Answerer>,
    ) -> Self {
        let mut answerers = BTreeMap::new();
        answerers.insert(AnswererId::from(SINGLE_ANSWERER_ID), answerer);
        Self {
            moderator,
            retriever,
            answerers,
            answer_timeout: None,
            observer: Arc::new(NoOpObserver),
        }
    }

    /// Bound each answerer call. A backend that exceeds it fails with `ServiceError::Timeout`.
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = Some(timeout);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Configured backend identities, sorted.
    pub fn identities(&self) -> Vec<&AnswererId> {
        self.answerers.keys().collect()
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout
    }

    /// Run the pipeline for one prompt.
    pub async fn process(&self, prompt: &str) -> Result<PipelineResult, PipelineError> {
        let mut run = Run::new(self.observer.as_ref());
        let start = Instant::now();
        info!(
            run_id = %run.id,
            backends = self.answerers.len(),
            prompt_len = prompt.len(),
            "Pipeline run started"
        );

        let outcome = self.drive(&mut run, prompt).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => info!(
                run_id = %run.id,
                answers = result.answers.len(),
                context_len = result.context.len(),
                latency_ms,
                "Pipeline run completed"
            ),
            Err(PipelineError::Blocked { reason }) => warn!(
                run_id = %run.id,
                reason = %reason,
                latency_ms,
                "Prompt blocked by moderation"
            ),
            Err(e) => warn!(
                run_id = %run.id,
                error = %e,
                latency_ms,
                "Pipeline run failed"
            ),
        }
        outcome
    }

    async fn drive(&self, run: &mut Run<'_>, prompt: &str) -> Result<PipelineResult, PipelineError> {
        run.transition(RunState::Moderating).await;
        let verdict = match self.moderator.moderate(prompt).await {
            Ok(verdict) => verdict,
            Err(source) => {
                run.transition(RunState::Failed).await;
                return Err(PipelineError::StageFailure {
                    stage: Stage::Moderation,
                    source,
                });
            }
        };
        if !verdict.is_safe {
            run.transition(RunState::Blocked).await;
            return Err(PipelineError::Blocked {
                reason: verdict.reason,
            });
        }

        run.transition(RunState::Retrieving).await;
        let context = match self.retriever.retrieve(prompt).await {
            Ok(context) => context,
            Err(source) => {
                run.transition(RunState::Failed).await;
                return Err(PipelineError::StageFailure {
                    stage: Stage::Retrieval,
                    source,
                });
            }
        };
        debug!(run_id = %run.id, context_len = context.len(), "Context retrieved");

        run.transition(RunState::Querying).await;
        match self.fan_out(run.id, prompt, &context).await {
            Ok(answers) => {
                run.transition(RunState::Done).await;
                Ok(PipelineResult { context, answers })
            }
            Err(failures) => {
                run.transition(RunState::Failed).await;
                Err(PipelineError::BackendFailure { failures })
            }
        }
    }

    /// Ask every answerer concurrently and wait for all of them.
    ///
    /// Returns every failure (sorted by identity) if any answerer failed.
    async fn fan_out(
        &self,
        run_id: Uuid,
        prompt: &str,
        context: &str,
    ) -> Result<BTreeMap<AnswererId, String>, Vec<BackendFailure>> {
        let timeout = self.answer_timeout;
        let calls = self.answerers.iter().map(|(identity, answerer)| {
            let answerer = Arc::clone(answerer);
            async move {
                let start = Instant::now();
                let outcome = match timeout {
                    Some(limit) => tokio::time::timeout(limit, answerer.ask(prompt, context))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ServiceError::Timeout {
                                timeout_secs: limit.as_secs_f64().ceil() as u64,
                            })
                        }),
                    None => answerer.ask(prompt, context).await,
                };
                let latency_ms = start.elapsed().as_millis() as u64;

                match &outcome {
                    Ok(answer) => debug!(
                        run_id = %run_id,
                        backend = %identity,
                        answer_len = answer.len(),
                        latency_ms,
                        "Backend answered"
                    ),
                    Err(e) => warn!(
                        run_id = %run_id,
                        backend = %identity,
                        error = %e,
                        latency_ms,
                        "Backend failed to answer"
                    ),
                }
                (identity.clone(), outcome)
            }
        });

        let outcomes = join_all(calls).await;

        let mut answers = BTreeMap::new();
        let mut failures = Vec::new();
        for (identity, outcome) in outcomes {
            match outcome {
                Ok(answer) => {
                    answers.insert(identity, answer);
                }
                Err(cause) => failures.push(BackendFailure { identity, cause }),
            }
        }

        if failures.is_empty() {
            Ok(answers)
        } else {
            failures.sort_by(|a, b| a.identity.cmp(&b.identity));
            Err(failures)
        }
    }
}

/// Per-run state tracker. Lives only for the duration of one `process` call.
struct Run<'a> {
    id: Uuid,
    state: RunState,
    observer: &'a dyn PipelineObserver,
}

impl<'a> Run<'a> {
    fn new(observer: &'a dyn PipelineObserver) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RunState::Idle,
            observer,
        }
    }

    async fn transition(&mut self, to: RunState) {
        let from = self.state;
        debug_assert!(
            !from.is_terminal(),
            "run {} already finished in state {}",
            self.id,
            from
        );
        debug!(run_id = %self.id, from = %from, to = %to, "Pipeline state transition");
        self.state = to;
        self.observer.on_transition(self.id, from, to).await;
    }
}
