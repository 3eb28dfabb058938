//! Retrieval: turning a prompt into supporting context.
//!
//! The pipeline only sees the [`Retriever`] trait. [`DocumentIndexer`] is the
//! production implementation backed by the local hybrid search index.

mod indexer;

pub use indexer::{DocumentIndexer, IndexStats};

use crate::error::ServiceError;
use async_trait::async_trait;

/// Produces a context string for a query from an external document index.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve supporting context for `query`. An empty string means no context was found.
    async fn retrieve(&self, query: &str) -> Result<String, ServiceError>;
}

/// Retriever that always returns the same context. Useful for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    context: String,
}

impl StaticRetriever {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
        }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<String, ServiceError> {
        Ok(self.context.clone())
    }
}
