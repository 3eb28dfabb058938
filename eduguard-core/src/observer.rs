//! Observation hooks for pipeline state transitions.

use crate::types::RunState;
use async_trait::async_trait;
use uuid::Uuid;

/// A single recorded state change of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub run_id: Uuid,
    pub from: RunState,
    pub to: RunState,
}

/// Receives every state transition of every run.
///
/// Called inline on the run's task; implementations must not block.
#[async_trait]
pub trait PipelineObserver: Send + Sync {
    async fn on_transition(&self, run_id: Uuid, from: RunState, to: RunState);
}

/// Observer that ignores all transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

#[async_trait]
impl PipelineObserver for NoOpObserver {
    async fn on_transition(&self, _run_id: Uuid, _from: RunState, _to: RunState) {}
}

/// An observer that records all transitions for test assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    transitions: tokio::sync::Mutex<Vec<Transition>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().await.clone()
    }

    /// States visited by one run, starting from its first transition target.
    pub async fn states_for(&self, run_id: Uuid) -> Vec<RunState> {
        self.transitions
            .lock()
            .await
            .iter()
            .filter(|t| t.run_id == run_id)
            .map(|t| t.to)
            .collect()
    }

    /// Distinct run ids in the order they were first seen.
    pub async fn run_ids(&self) -> Vec<Uuid> {
        let transitions = self.transitions.lock().await;
        let mut ids = Vec::new();
        for t in transitions.iter() {
            if !ids.contains(&t.run_id) {
                ids.push(t.run_id);
            }
        }
        ids
    }
}

#[async_trait]
impl PipelineObserver for RecordingObserver {
    async fn on_transition(&self, run_id: Uuid, from: RunState, to: RunState) {
        self.transitions
            .lock()
            .await
            .push(Transition { run_id, from, to });
    }
}
