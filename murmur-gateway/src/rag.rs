//! Document question-answering over uploaded PDFs.
//!
//! An upload is extracted, split into overlapping character chunks,
//! embedded, and held in an in-memory cosine index keyed by session id.
//! Each session holds at most one document; re-uploading replaces it.
//! Queries retrieve the closest chunks and feed them to the completion
//! pipeline as rendered prompt context. No chat history is involved.

use crate::provider::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Produces query-time snippets for a single indexed document.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The chunks most similar to the query, best first.
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}

/// Turns text into embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

const EMBEDDING_PROVIDER: &str = "openai";

/// OpenAI embeddings endpoint.
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedding {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com")
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                Error::from(ProviderError::new(
                    EMBEDDING_PROVIDER,
                    &self.model,
                    format!("Request failed: {}", e),
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                EMBEDDING_PROVIDER,
                &self.model,
                format!("API error: {}", body),
            )
            .with_status(status.as_u16())
            .into());
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            Error::from(ProviderError::new(
                EMBEDDING_PROVIDER,
                &self.model,
                format!("Failed to parse response: {}", e),
            ))
        })?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Extract plain text from PDF bytes.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::validation(format!("Failed to read PDF: {}", e)))?;

    if text.trim().is_empty() {
        return Err(Error::validation("PDF contains no extractable text"));
    }

    Ok(text)
}

/// Split text into overlapping character chunks.
///
/// The window advances by `chunk_size - chunk_overlap` (at least one
/// character), so consecutive chunks share a tail. Whitespace-only chunks
/// are dropped.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// In-memory cosine similarity index over one document's chunks.
pub struct VectorIndex {
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
    embedding: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

#[async_trait]
impl Retriever for VectorIndex {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let query_vec = self
            .embedding
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("Embedding response was empty"))?;

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (cosine_similarity(&query_vec, v), i))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, i)| self.chunks[i].clone())
            .collect())
    }
}

/// Builds a [`VectorIndex`] from raw document bytes.
pub struct DocumentIndexer {
    embedding: Arc<dyn EmbeddingProvider>,
    chunk_size: usize,
    chunk_overlap: usize,
    top_k: usize,
}

impl DocumentIndexer {
    pub fn new(
        embedding: Arc<dyn EmbeddingProvider>,
        chunk_size: usize,
        chunk_overlap: usize,
        top_k: usize,
    ) -> Self {
        Self {
            embedding,
            chunk_size,
            chunk_overlap,
            top_k,
        }
    }

    /// Extract, split, embed, and index a PDF.
    pub async fn index(&self, file_name: &str, bytes: &[u8]) -> Result<UploadedDocument> {
        let text = extract_pdf_text(bytes)?;
        let chunks = split_text(&text, self.chunk_size, self.chunk_overlap);

        if chunks.is_empty() {
            return Err(Error::validation("PDF contains no extractable text"));
        }

        let vectors = self.embedding.embed(&chunks).await?;

        if vectors.len() != chunks.len() {
            return Err(Error::provider(format!(
                "Embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let chunk_count = chunks.len();
        tracing::info!(file_name = %file_name, chunks = chunk_count, "Document indexed");

        Ok(UploadedDocument {
            file_name: file_name.to_string(),
            chunk_count,
            uploaded_at: Utc::now(),
            retriever: Arc::new(VectorIndex {
                chunks,
                vectors,
                embedding: Arc::clone(&self.embedding),
                top_k: self.top_k,
            }),
        })
    }
}

/// One indexed document, owned by a session.
#[derive(Clone)]
pub struct UploadedDocument {
    pub file_name: String,
    pub chunk_count: usize,
    pub uploaded_at: DateTime<Utc>,
    pub retriever: Arc<dyn Retriever>,
}

/// Per-session document registry. At most one document per session; an
/// insert replaces whatever was there.
#[derive(Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<String, UploadedDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: &str, document: UploadedDocument) {
        self.documents
            .write()
            .await
            .insert(session_id.to_string(), document);
    }

    pub async fn get(&self, session_id: &str) -> Option<UploadedDocument> {
        self.documents.read().await.get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embedding stub scoring each text by its first character.
    struct StubEmbedding;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedding {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let c = t.chars().next().unwrap_or('\0') as u32 as f32;
                    vec![c, 1.0]
                })
                .collect())
        }
    }

    #[test]
    fn test_split_text_overlap() {
        let text = "abcdefghij";
        let chunks = split_text(text, 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn test_split_text_shorter_than_chunk() {
        assert_eq!(split_text("short", 1000, 50), vec!["short"]);
    }

    #[test]
    fn test_split_text_empty_and_blank() {
        assert!(split_text("", 100, 10).is_empty());
        assert!(split_text("   \n\n  ", 100, 10).is_empty());
    }

    #[test]
    fn test_split_text_multibyte_safe() {
        let text = "안녕하세요 반갑습니다";
        let chunks = split_text(text, 4, 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        let joined: String = chunks.concat();
        assert!(joined.contains("안녕"));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_vector_index_retrieves_closest() {
        let embedding = Arc::new(StubEmbedding);
        let chunks = vec!["apple".to_string(), "banana".to_string(), "cherry".to_string()];
        let vectors = embedding.embed(&chunks).await.unwrap();

        let index = VectorIndex {
            chunks,
            vectors,
            embedding,
            top_k: 1,
        };

        let hits = index.retrieve("apricot").await.unwrap();
        assert_eq!(hits, vec!["apple".to_string()]);
    }

    #[tokio::test]
    async fn test_document_store_replaces_on_insert() {
        let embedding: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedding);
        let store = DocumentStore::new();

        let make = |name: &str, retriever_embedding: Arc<dyn EmbeddingProvider>| UploadedDocument {
            file_name: name.to_string(),
            chunk_count: 1,
            uploaded_at: Utc::now(),
            retriever: Arc::new(VectorIndex {
                chunks: vec!["x".into()],
                vectors: vec![vec![1.0, 0.0]],
                embedding: retriever_embedding,
                top_k: 1,
            }),
        };

        store.insert("s1", make("first.pdf", Arc::clone(&embedding))).await;
        store.insert("s1", make("second.pdf", Arc::clone(&embedding))).await;

        let doc = store.get("s1").await.unwrap();
        assert_eq!(doc.file_name, "second.pdf");
        assert!(store.get("other").await.is_none());
    }

    #[test]
    fn test_extract_pdf_rejects_garbage() {
        let err = extract_pdf_text(b"not a pdf at all").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
