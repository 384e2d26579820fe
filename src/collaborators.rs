// ============================================================================
// External Collaborators
// ============================================================================
//
// Document extraction, search and completion live outside the core. The core
// only needs to know whether each call succeeded, so the seams are narrow
// async traits over plain data. The in-memory implementations below keep the
// service runnable without any cloud backend.
//
// ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{AppError, AppResult};

pub const DEFAULT_INDEX_NAME: &str = "documents-index";

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "md", "py", "js", "java", "c", "cpp", "h", "cs", "ts", "tsx", "html", "css",
    "json",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_name: String,
    pub content: String,
    pub score: usize,
}

#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Turn an uploaded file into indexable text chunks.
    async fn extract_chunks(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<String>>;
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Returns how many chunks were indexed.
    async fn add_chunks(&self, index: &str, file_name: &str, chunks: Vec<String>) -> Result<usize>;

    async fn search(&self, index: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;

    async fn document_count(&self, index: &str) -> Result<usize>;
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], context: &str) -> Result<String>;
}

/// The collaborator set handed to routes and jobs
#[derive(Clone)]
pub struct Collaborators {
    pub processor: Arc<dyn DocumentProcessor>,
    pub index: Arc<dyn SearchIndex>,
    pub completion: Arc<dyn CompletionService>,
}

impl Collaborators {
    pub fn demo() -> Self {
        Self {
            processor: Arc::new(PlainTextProcessor::default()),
            index: Arc::new(InMemoryIndex::default()),
            completion: Arc::new(ContextEchoCompletion),
        }
    }
}

/// Lower-cases and checks an optional index name: `[a-z0-9][a-z0-9_-]{1,62}`.
pub fn normalize_index_name(raw: Option<&str>) -> AppResult<Option<String>> {
    let trimmed = raw.map(str::trim).unwrap_or("");
    if trimmed.is_empty() {
        return Ok(None);
    }
    let name = trimmed.to_lowercase();
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !first_ok || !rest_ok || !(2..=63).contains(&name.len()) {
        return Err(AppError::validation(
            "index_name must be 2-63 characters of lowercase letters, digits, '-' or '_'",
        ));
    }
    Ok(Some(name))
}

pub fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

// ============================================================================
// Demo implementations
// ============================================================================

/// Decodes text and code files and splits them into paragraph-sized chunks.
#[derive(Debug, Clone)]
pub struct PlainTextProcessor {
    pub max_chunk_chars: usize,
}

impl Default for PlainTextProcessor {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1200,
        }
    }
}

impl PlainTextProcessor {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if !current.is_empty() && current.len() + paragraph.len() + 2 > self.max_chunk_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[async_trait]
impl DocumentProcessor for PlainTextProcessor {
    async fn extract_chunks(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<String>> {
        let ext = file_extension(file_name);
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            anyhow::bail!(
                "Unsupported file type: .{}",
                if ext.is_empty() { "unknown" } else { ext.as_str() }
            );
        }
        let text = String::from_utf8_lossy(bytes);
        Ok(self.chunk(&text))
    }
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    file_name: String,
    content: String,
    terms: HashSet<String>,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Keyword-overlap search over chunks kept in memory, one list per index.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    indexes: Mutex<HashMap<String, Vec<IndexedChunk>>>,
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn add_chunks(&self, index: &str, file_name: &str, chunks: Vec<String>) -> Result<usize> {
        let batch: Vec<IndexedChunk> = chunks
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .map(|content| IndexedChunk {
                file_name: file_name.to_string(),
                terms: tokenize(&content),
                content,
            })
            .collect();
        let added = batch.len();
        self.indexes
            .lock()
            .entry(index.to_string())
            .or_default()
            .extend(batch);
        Ok(added)
    }

    async fn search(&self, index: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let indexes = self.indexes.lock();
        let mut hits: Vec<SearchHit> = indexes
            .get(index)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let score = query_terms.intersection(&chunk.terms).count();
                        (score > 0).then(|| SearchHit {
                            file_name: chunk.file_name.clone(),
                            content: chunk.content.clone(),
                            score,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn document_count(&self, index: &str) -> Result<usize> {
        Ok(self.indexes.lock().get(index).map(Vec::len).unwrap_or(0))
    }
}

/// Answers with the retrieved context instead of calling a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextEchoCompletion;

#[async_trait]
impl CompletionService for ContextEchoCompletion {
    async fn complete(&self, messages: &[ChatMessage], context: &str) -> Result<String> {
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.trim())
            .unwrap_or("");
        let excerpt: String = context.chars().take(600).collect();
        Ok(format!(
            "Question: {}\n\nRelevant excerpts from the uploaded documents:\n\n{}",
            question, excerpt
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_are_validated() {
        assert_eq!(normalize_index_name(None).unwrap(), None);
        assert_eq!(normalize_index_name(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_index_name(Some("HR-Docs")).unwrap().as_deref(),
            Some("hr-docs")
        );
        assert!(normalize_index_name(Some("-bad")).is_err());
        assert!(normalize_index_name(Some("a")).is_err());
        assert!(normalize_index_name(Some("has space")).is_err());
    }

    #[tokio::test]
    async fn processor_rejects_binary_formats() {
        let processor = PlainTextProcessor::default();
        assert!(processor.extract_chunks("scan.pdf", b"%PDF").await.is_err());
        let chunks = processor
            .extract_chunks("notes.md", b"first paragraph\n\nsecond paragraph")
            .await
            .unwrap();
        assert_eq!(chunks, vec!["first paragraph\n\nsecond paragraph"]);
    }

    #[test]
    fn long_text_is_split() {
        let processor = PlainTextProcessor { max_chunk_chars: 10 };
        assert_eq!(processor.chunk("aaaaaa\n\nbbbbbb\n\n\n\ncc"), vec!["aaaaaa", "bbbbbb\n\ncc"]);
    }

    #[tokio::test]
    async fn in_memory_index_ranks_by_overlap() {
        let index = InMemoryIndex::default();
        index
            .add_chunks(
                DEFAULT_INDEX_NAME,
                "handbook.md",
                vec![
                    "vacation policy and leave requests".to_string(),
                    "expense reports".to_string(),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(DEFAULT_INDEX_NAME, "How do leave requests work?", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "handbook.md");
        assert_eq!(index.document_count(DEFAULT_INDEX_NAME).await.unwrap(), 2);
        assert_eq!(index.document_count("other").await.unwrap(), 0);
    }
}
