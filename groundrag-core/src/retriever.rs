//! Retrieval capability and the adapter the pipeline calls through.

use crate::config::RetryConfig;
use crate::error::RetrievalError;
use crate::retry::with_retry;
use crate::types::Passage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A search service over the passage index.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `top_k` passages, highest similarity first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Arc<Passage>>, RetrievalError>;
}

/// Wraps a `Retriever` with a per-call timeout and transport-level retry.
///
/// An empty index and a timeout after all retries both yield an empty result;
/// only errors that point at an unusable service are returned.
pub struct RetrieverAdapter {
    retriever: Arc<dyn Retriever>,
    retry: RetryConfig,
    timeout: Duration,
}

impl RetrieverAdapter {
    pub fn new(retriever: Arc<dyn Retriever>, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            retriever,
            retry,
            timeout,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Arc<Passage>>, RetrievalError> {
        let timeout = self.timeout;
        let result = with_retry(&self.retry, || {
            let retriever = Arc::clone(&self.retriever);
            async move {
                match tokio::time::timeout(timeout, retriever.search(query, top_k)).await {
                    Ok(result) => result,
                    Err(_) => Err(RetrievalError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    }),
                }
            }
        })
        .await;

        match result {
            Ok(mut passages) => {
                passages.truncate(top_k);
                debug!(count = passages.len(), top_k, "Retrieved passages");
                Ok(passages)
            }
            Err(RetrievalError::EmptyIndex) => {
                warn!("Index is empty, nothing to retrieve");
                Ok(Vec::new())
            }
            Err(err @ RetrievalError::Timeout { .. }) => {
                warn!(error = %err, "Retrieval timed out, continuing with no passages");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }
}

/// A retriever over a fixed passage list, matched by term overlap.
///
/// Used in tests and for small in-memory corpora where no index is wanted.
#[derive(Debug, Default)]
pub struct StaticRetriever {
    passages: Vec<Arc<Passage>>,
}

impl StaticRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages: passages.into_iter().map(Arc::new).collect(),
        }
    }

    fn overlap(query_terms: &[String], text: &str) -> usize {
        let lowered = text.to_lowercase();
        query_terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .count()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Arc<Passage>>, RetrievalError> {
        if self.passages.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        let terms: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(usize, usize)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| (i, Self::overlap(&terms, &p.text)))
            .collect();
        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, _)| Arc::clone(&self.passages[i]))
            .collect())
    }
}
