//! Scripted answerer for tests and offline runs.

use super::Answerer;
use crate::error::ServiceError;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Echo,
    Fail(ServiceError),
}

/// An [`Answerer`] that returns a fixed reply (or error) and records its calls.
#[derive(Debug)]
pub struct MockAnswerer {
    behavior: Behavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_call: Mutex<Option<(String, String)>>,
}

impl MockAnswerer {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
            last_call: Mutex::new(None),
        }
    }

    /// Always answer with `text`.
    pub fn with_response(text: &str) -> Self {
        Self::with_behavior(Behavior::Reply(text.to_string()))
    }

    /// Answer with `"{prompt} | {context}"`, so callers can see what was forwarded.
    pub fn echo() -> Self {
        Self::with_behavior(Behavior::Echo)
    }

    /// Always fail with `error`.
    pub fn failing(error: ServiceError) -> Self {
        Self::with_behavior(Behavior::Fail(error))
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `ask` has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent `(prompt, context)` pair received.
    pub fn last_call(&self) -> Option<(String, String)> {
        self.last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Answerer for MockAnswerer {
    async fn ask(&self, prompt: &str, context: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some((prompt.to_string(), context.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Echo => Ok(format!("{} | {}", prompt, context)),
            Behavior::Fail(error) => Err(error.clone()),
        }
    }
}
