//! Document splitting for ingestion.
//!
//! `TokenSplitter` splits recursively on a separator hierarchy (paragraphs,
//! lines, sentences, words) and greedily merges the pieces into chunks of at
//! most `chunk_size` BPE tokens, carrying up to `chunk_overlap` tokens of
//! trailing context into the next chunk.

use crate::config::SplitterConfig;
use crate::error::IngestError;
use tiktoken_rs::CoreBPE;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// A source document handed to a splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A chunk of a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub position: usize,
    pub token_count: usize,
}

/// Splits documents into passages-to-be.
pub trait Splitter: Send + Sync {
    fn split(&self, document: &Document) -> Vec<Chunk>;
}

/// Recursive splitter measuring chunk length in BPE tokens.
pub struct TokenSplitter {
    bpe: CoreBPE,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl std::fmt::Debug for TokenSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .finish()
    }
}

impl TokenSplitter {
    /// Create a splitter for the configured tokenizer model.
    /// Falls back to cl100k_base if the model isn't recognized.
    pub fn new(config: &SplitterConfig) -> Result<Self, IngestError> {
        let bpe = tiktoken_rs::get_bpe_from_model(&config.tokenizer_model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .map_err(|e| IngestError::Tokenizer {
                message: e.to_string(),
            })?;
        Ok(Self {
            bpe,
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
        })
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn split_recursive(&self, text: &str, separators: &[&str], out: &mut Vec<String>) {
        let Some((separator, rest)) = separators
            .iter()
            .position(|sep| text.contains(sep))
            .map(|i| (separators[i], &separators[i + 1..]))
        else {
            self.split_chars(text, out);
            return;
        };

        let mut fitting: Vec<(&str, usize)> = Vec::new();
        for piece in text.split_inclusive(separator) {
            let tokens = self.count(piece);
            if tokens <= self.chunk_size {
                fitting.push((piece, tokens));
            } else {
                self.merge(&fitting, out);
                fitting.clear();
                self.split_recursive(piece, rest, out);
            }
        }
        self.merge(&fitting, out);
    }

    /// Greedily join pieces into chunks, keeping an overlapping tail.
    fn merge(&self, pieces: &[(&str, usize)], out: &mut Vec<String>) {
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;
        for &(piece, tokens) in pieces {
            if total + tokens > self.chunk_size && !window.is_empty() {
                out.push(window.iter().map(|(p, _)| *p).collect());
                while total > self.chunk_overlap
                    || (total + tokens > self.chunk_size && !window.is_empty())
                {
                    let (_, dropped) = window.remove(0);
                    total -= dropped;
                    if window.is_empty() {
                        break;
                    }
                }
            }
            window.push((piece, tokens));
            total += tokens;
        }
        if !window.is_empty() {
            out.push(window.iter().map(|(p, _)| *p).collect());
        }
    }

    /// Last resort for runs without any separator.
    fn split_chars(&self, text: &str, out: &mut Vec<String>) {
        let mut current = String::new();
        let mut total = 0;
        for ch in text.chars() {
            let mut buf = [0u8; 4];
            let tokens = self.count(ch.encode_utf8(&mut buf)).max(1);
            if total + tokens > self.chunk_size && !current.is_empty() {
                out.push(std::mem::take(&mut current));
                total = 0;
            }
            current.push(ch);
            total += tokens;
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
}

impl Splitter for TokenSplitter {
    fn split(&self, document: &Document) -> Vec<Chunk> {
        let mut raw = Vec::new();
        self.split_recursive(&document.text, &SEPARATORS, &mut raw);
        raw.iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(position, text)| Chunk {
                text: text.to_string(),
                position,
                token_count: self.count(text),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> TokenSplitter {
        TokenSplitter::new(&SplitterConfig {
            chunk_size,
            chunk_overlap,
            tokenizer_model: "gpt-3.5-turbo".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_short_document_is_one_chunk() {
        let s = splitter(500, 100);
        let chunks = s.split(&Document::new("a.md", "Scope 3 covers value chain emissions."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].text, "Scope 3 covers value chain emissions.");
    }

    #[test]
    fn test_empty_document_has_no_chunks() {
        let s = splitter(50, 10);
        assert!(s.split(&Document::new("empty.txt", "  \n\n  ")).is_empty());
    }

    #[test]
    fn test_chunks_respect_token_limit() {
        let s = splitter(20, 5);
        let text = (0..40)
            .map(|i| format!("Sentence number {i} talks about emissions."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = s.split(&Document::new("long.txt", text));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 20 + 2, "chunk too long: {}", chunk.token_count);
        }
        let positions: Vec<usize> = chunks.iter().map(|c| c.position).collect();
        assert_eq!(positions, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let s = splitter(12, 6);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho sigma";
        let chunks = s.split(&Document::new("greek.txt", text));
        assert!(chunks.len() >= 2);
        let first_last_word = chunks[0].text.split_whitespace().last().unwrap();
        assert!(chunks[1].text.contains(first_last_word));
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let s = splitter(40, 0);
        let para = "Scope 1 emissions come from owned sources. ".repeat(3);
        let text = format!("{para}\n\n{para}");
        let chunks = s.split(&Document::new("p.md", text));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, para.trim());
    }

    #[test]
    fn test_unbroken_run_is_split() {
        let s = splitter(10, 2);
        let text = "x".repeat(500);
        let chunks = s.split(&Document::new("blob.txt", text));
        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().map(|c| c.text.len()).sum::<usize>(), 500);
    }
}
