//! Core data types shared by the pipeline and its collaborators.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of moderating a single prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub is_safe: bool,
    /// Why the text was flagged. Empty when safe, unless a collaborator
    /// annotates a fallback verdict.
    #[serde(default)]
    pub reason: String,
}

impl ModerationVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            reason: String::new(),
        }
    }

    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: reason.into(),
        }
    }
}

/// Stable, caller-chosen key identifying one configured answering backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswererId(String);

impl AnswererId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnswererId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnswererId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AnswererId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for AnswererId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A collaborator-facing stage of the pipeline that can fail on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Moderation,
    Retrieval,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Moderation => write!(f, "moderation"),
            Stage::Retrieval => write!(f, "retrieval"),
        }
    }
}

/// Logical state of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Moderating,
    Retrieving,
    Querying,
    Done,
    Blocked,
    Failed,
}

impl RunState {
    /// Whether no further transitions can follow this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Blocked | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Moderating => "moderating",
            RunState::Retrieving => "retrieving",
            RunState::Querying => "querying",
            RunState::Done => "done",
            RunState::Blocked => "blocked",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Successful result of a pipeline run: the shared context and one answer per backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub context: String,
    pub answers: BTreeMap<AnswererId, String>,
}

impl PipelineResult {
    /// Look up the answer produced by the backend with the given identity.
    pub fn answer(&self, identity: &str) -> Option<&str> {
        self.answers.get(identity).map(String::as_str)
    }

    /// Unwrap a single-backend result into `(context, answer)`.
    ///
    /// Returns `None` when the result holds anything other than exactly one answer.
    pub fn into_single(self) -> Option<(String, String)> {
        if self.answers.len() != 1 {
            return None;
        }
        let answer = self.answers.into_values().next()?;
        Some((self.context, answer))
    }
}
