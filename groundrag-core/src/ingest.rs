//! Corpus ingestion: walk a directory, split documents, index the chunks.

use crate::error::IngestError;
use crate::index::HybridIndex;
use crate::pdf;
use crate::splitter::{Document, Splitter};
use crate::types::{Passage, PassageMetadata};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Counters reported after an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub passages: usize,
    pub tokens: usize,
    pub elapsed_ms: u64,
}

/// Whether `path` carries one of the accepted extensions (case-insensitive).
fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Read a corpus file as text. `Ok(None)` means the file should be skipped.
async fn read_document(path: &Path) -> Result<Option<String>, IngestError> {
    if pdf::is_pdf(path) {
        let bytes = tokio::fs::read(path).await.map_err(|e| IngestError::ReadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let owned = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || pdf::extract_text(&owned, &bytes))
            .await
            .map_err(|e| IngestError::ReadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        return match extracted {
            Ok(text) if text.trim().is_empty() => {
                warn!(path = %path.display(), "Skipping PDF without a text layer");
                Ok(None)
            }
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable PDF");
                Ok(None)
            }
        };
    }

    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            warn!(path = %path.display(), "Skipping file that is not valid UTF-8");
            Ok(None)
        }
        Err(e) => Err(IngestError::ReadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Split every matching file under `dir` and add the chunks to `index`.
///
/// `dir` may also name a single file. Passages get `document_id` = path
/// relative to `dir` (forward slashes; the file name for a single file) and
/// `position` = chunk index within the document; their id is
/// `"{document_id}#{position}"`. PDFs are read through their text layer.
/// Files that are not valid UTF-8, and PDFs without extractable text, are
/// skipped.
pub async fn ingest_directory(
    dir: &Path,
    extensions: &[String],
    splitter: &dyn Splitter,
    index: &HybridIndex,
) -> Result<IngestStats, IngestError> {
    if !dir.exists() {
        return Err(IngestError::CorpusNotFound {
            path: dir.to_path_buf(),
        });
    }
    let root = match dir.parent() {
        Some(parent) if dir.is_file() => parent,
        _ => dir,
    };
    let started = Instant::now();
    let mut stats = IngestStats::default();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| IngestError::ReadFailed {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, extensions) {
            continue;
        }

        let Some(text) = read_document(path).await? else {
            stats.files_skipped += 1;
            continue;
        };

        let document_id = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let chunks = splitter.split(&Document::new(document_id.clone(), text));
        if chunks.is_empty() {
            debug!(document = %document_id, "Document produced no chunks");
            stats.files_skipped += 1;
            continue;
        }

        stats.tokens += chunks.iter().map(|c| c.token_count).sum::<usize>();
        let passages: Vec<Passage> = chunks
            .into_iter()
            .map(|chunk| {
                Passage::new(
                    format!("{}#{}", document_id, chunk.position),
                    chunk.text,
                    PassageMetadata {
                        document_id: document_id.clone(),
                        position: chunk.position,
                    },
                )
            })
            .collect();
        stats.passages += index.add_passages(passages).await?;
        stats.files_indexed += 1;
        debug!(document = %document_id, "Document indexed");
    }

    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        files = stats.files_indexed,
        skipped = stats.files_skipped,
        passages = stats.passages,
        elapsed_ms = stats.elapsed_ms,
        "Corpus ingested"
    );
    Ok(stats)
}
