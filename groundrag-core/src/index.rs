//! # Hybrid passage index (Tantivy + vectors)
//!
//! Combines Tantivy BM25 full-text search with embedding cosine similarity.
//! Passages are indexed in both, and the two scores are blended with
//! configurable weights. BM25 scores are normalised by the best hit of the
//! query so both halves live in 0.0-1.0.
//!
//! The index is held in memory and is safe for concurrent reads; writes are
//! serialised on the Tantivy writer.

use crate::config::RetrievalConfig;
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::RetrievalError;
use crate::retriever::Retriever;
use crate::types::Passage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, STORED, STRING, Schema, TEXT, Value};
use tantivy::{
    Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term, doc,
};
use tracing::{debug, info};

/// Minimum number of BM25 candidates pulled per query.
const MIN_TEXT_CANDIDATES: usize = 100;

/// A scored hit, exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Arc<Passage>,
    pub full_text_score: f32,
    pub vector_score: f32,
    pub combined_score: f32,
}

struct IndexedPassage {
    passage: Arc<Passage>,
    vector: Vec<f32>,
}

#[derive(Default)]
struct PassageStore {
    entries: Vec<IndexedPassage>,
    positions: HashMap<String, usize>,
}

/// In-memory hybrid index over corpus passages.
pub struct HybridIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    text_field: Field,
    store: RwLock<PassageStore>,
    embedder: Arc<dyn Embedder>,
    full_text_weight: f32,
    vector_weight: f32,
}

impl std::fmt::Debug for HybridIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridIndex")
            .field("embedder", &self.embedder.provider_name())
            .field("indexed_count", &self.len())
            .finish()
    }
}

fn index_err(context: &str, err: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Index {
        message: format!("{}: {}", context, err),
    }
}

impl HybridIndex {
    /// Create an empty in-memory index.
    pub fn new(embedder: Arc<dyn Embedder>, config: &RetrievalConfig) -> Result<Self, RetrievalError> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| index_err("Failed to create reader", e))?;
        let writer = index
            .writer_with_num_threads(1, 15_000_000)
            .map_err(|e| index_err("Failed to create writer", e))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            text_field,
            store: RwLock::new(PassageStore::default()),
            embedder,
            full_text_weight: config.full_text_weight,
            vector_weight: config.vector_weight,
        })
    }

    /// Index passages for both full-text and vector search.
    ///
    /// A passage whose id is already indexed replaces the previous one.
    /// Returns the number of passages indexed.
    pub async fn add_passages(&self, passages: Vec<Passage>) -> Result<usize, RetrievalError> {
        if passages.is_empty() {
            return Ok(0);
        }
        let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != passages.len() {
            return Err(index_err(
                "Embedding count mismatch",
                format!("{} passages, {} vectors", passages.len(), vectors.len()),
            ));
        }

        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|e| index_err("Index writer lock poisoned", e))?;
            for passage in &passages {
                writer.delete_term(Term::from_field_text(self.id_field, &passage.id));
                writer
                    .add_document(doc!(
                        self.id_field => passage.id.as_str(),
                        self.text_field => passage.text.as_str(),
                    ))
                    .map_err(|e| index_err("Failed to add document", e))?;
            }
            writer
                .commit()
                .map_err(|e| index_err("Failed to commit", e))?;
        }
        self.reader
            .reload()
            .map_err(|e| index_err("Failed to reload reader", e))?;

        let count = passages.len();
        let mut store = self
            .store
            .write()
            .map_err(|e| index_err("Passage store lock poisoned", e))?;
        for (passage, vector) in passages.into_iter().zip(vectors) {
            let entry = IndexedPassage {
                passage: Arc::new(passage),
                vector,
            };
            match store.positions.get(&entry.passage.id).copied() {
                Some(pos) => store.entries[pos] = entry,
                None => {
                    let pos = store.entries.len();
                    store.positions.insert(entry.passage.id.clone(), pos);
                    store.entries.push(entry);
                }
            }
        }
        info!(added = count, total = store.entries.len(), "Indexed passages");
        Ok(count)
    }

    /// Number of indexed passages.
    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// BM25 scores keyed by passage id, normalised by the best hit.
    ///
    /// Tantivy search and stored-field reads block, so they run on the
    /// blocking pool against a snapshot searcher.
    async fn full_text_scores(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<HashMap<String, f32>, RetrievalError> {
        let search = TextSearch {
            index: self.index.clone(),
            searcher: self.reader.searcher(),
            id_field: self.id_field,
            text_field: self.text_field,
        };
        let query = query.to_string();
        tokio::task::spawn_blocking(move || search.scores(&query, limit))
            .await
            .map_err(|e| index_err("Search task failed", e))?
    }

    /// Hybrid search returning scores alongside passages.
    pub async fn search_scored(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        if self.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        let query_vector = self.embedder.embed(query).await?;
        let text_scores = self
            .full_text_scores(query, (top_k * 10).max(MIN_TEXT_CANDIDATES))
            .await?;

        let store = self
            .store
            .read()
            .map_err(|e| index_err("Passage store lock poisoned", e))?;
        let mut results: Vec<ScoredPassage> = store
            .entries
            .iter()
            .map(|entry| {
                let full_text_score = text_scores.get(&entry.passage.id).copied().unwrap_or(0.0);
                let vector_score = cosine_similarity(&query_vector, &entry.vector).max(0.0);
                ScoredPassage {
                    passage: Arc::clone(&entry.passage),
                    full_text_score,
                    vector_score,
                    combined_score: full_text_score * self.full_text_weight
                        + vector_score * self.vector_weight,
                }
            })
            .collect();

        // Stable sort: ties keep insertion order
        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }
}

/// A point-in-time view of the full-text index that can move to another thread.
struct TextSearch {
    index: Index,
    searcher: Searcher,
    id_field: Field,
    text_field: Field,
}

impl TextSearch {
    fn scores(&self, query: &str, limit: usize) -> Result<HashMap<String, f32>, RetrievalError> {
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "Query parsed leniently");
        }

        let top_docs = self
            .searcher
            .search(&parsed, &TopDocs::with_limit(limit.max(1)))
            .map_err(|e| index_err("Search failed", e))?;
        let best = top_docs.first().map(|(score, _)| *score).unwrap_or(0.0);

        let mut scores = HashMap::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = self
                .searcher
                .doc(address)
                .map_err(|e| index_err("Failed to retrieve doc", e))?;
            if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) {
                let normalised = if best > 0.0 { score / best } else { 0.0 };
                scores.insert(id.to_string(), normalised);
            }
        }
        Ok(scores)
    }
}

#[async_trait]
impl Retriever for HybridIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Arc<Passage>>, RetrievalError> {
        Ok(self
            .search_scored(query, top_k)
            .await?
            .into_iter()
            .map(|hit| hit.passage)
            .collect())
    }
}
