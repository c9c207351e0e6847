//! Pluggable embedding providers for the vector half of the hybrid index.
//!
//! Provides a trait-based abstraction over embedding models, with a local
//! hashed term-frequency embedder (always available) and the Ollama API.

use crate::config::EmbeddingConfig;
use crate::error::RetrievalError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Generate embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Local hashed term-frequency embedder. No external service needed.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Each word is hashed to a dimension index and its TF is accumulated.
    /// The resulting vector is L2-normalised.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = djb2(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn djb2(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Ollama embedder (uses the local Ollama `/api/embed` endpoint).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "nomic-embed-text".into());
        let dims = match model.as_str() {
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };
        Self {
            client: reqwest::Client::new(),
            model,
            dims,
            base_url: base_url
                .unwrap_or_else(|| "http://localhost:11434".into())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    async fn embed_api_call(&self, input: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable {
                message: format!("Ollama embedding request failed: {}", e),
            })?;
        if !resp.status().is_success() {
            return Err(RetrievalError::Unavailable {
                message: format!("Ollama embedding returned HTTP {}", resp.status()),
            });
        }
        let json: serde_json::Value =
            resp.json().await.map_err(|e| RetrievalError::Index {
                message: format!("Invalid embedding response: {}", e),
            })?;
        Self::parse_embeddings(&json, input.len())
    }

    fn parse_embeddings(
        json: &serde_json::Value,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let rows = json["embeddings"]
            .as_array()
            .ok_or_else(|| RetrievalError::Index {
                message: "embedding response has no 'embeddings' array".to_string(),
            })?;
        if rows.len() != expected {
            return Err(RetrievalError::Index {
                message: format!("expected {} embeddings, got {}", expected, rows.len()),
            });
        }
        Ok(rows
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut rows = self.embed_api_call(&[text]).await?;
        rows.pop().ok_or_else(|| RetrievalError::Index {
            message: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_api_call(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    match config.provider.as_str() {
        "ollama" => Arc::new(OllamaEmbedder::new(
            config.model.clone(),
            config.base_url.clone(),
        )),
        "local" => Arc::new(LocalEmbedder::new(config.dimensions)),
        other => {
            tracing::warn!(
                "Unknown embedding provider '{}', falling back to local",
                other
            );
            Arc::new(LocalEmbedder::new(config.dimensions))
        }
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_embedder_is_normalized() {
        let embedder = LocalEmbedder::new(64);
        let v = embedder.embed("scope three emissions emissions").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_local_embedder_empty_text() {
        let embedder = LocalEmbedder::new(16);
        let v = embedder.embed("  ... ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_similar_texts_score_higher() {
        let embedder = LocalEmbedder::new(256);
        let q = embedder.embed("value chain emissions").await.unwrap();
        let near = embedder.embed("Scope 3 covers value chain emissions").await.unwrap();
        let far = embedder.embed("The cafeteria opens at nine").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_default_batch_matches_single() {
        let embedder = LocalEmbedder::new(32);
        let batch = embedder.embed_batch(&["a b", "c"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed("c").await.unwrap());
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ollama_parse_embeddings() {
        let body = json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let rows = OllamaEmbedder::parse_embeddings(&body, 2).unwrap();
        assert_eq!(rows[1], vec![0.3, 0.4]);
        assert!(OllamaEmbedder::parse_embeddings(&body, 3).is_err());
        assert!(OllamaEmbedder::parse_embeddings(&json!({}), 1).is_err());
    }

    #[test]
    fn test_create_embedder() {
        let local = create_embedder(&EmbeddingConfig::default());
        assert_eq!(local.provider_name(), "local");
        let ollama = create_embedder(&EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("all-minilm".into()),
            ..Default::default()
        });
        assert_eq!(ollama.dimensions(), 384);
    }
}
