use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub type DocumentId = i64;
pub type TagId = i64;

pub const DEFAULT_CHUNK_LENGTH: usize = 4_000;
pub const DEFAULT_TAG_CONTEXT_CHARS: usize = 5_000;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A document as shown in listings, with its tag names and fact count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document: Document,
    pub tags: Vec<String>,
    pub fact_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactChunk {
    pub id: i64,
    pub document_id: DocumentId,
    pub chunk: String,
}

/// A stored fact returned by similarity search, closest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactHit {
    pub id: i64,
    pub document_id: DocumentId,
    pub chunk: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedFact {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Everything written by one ingestion transaction.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub checksum: String,
    pub facts: Vec<EmbeddedFact>,
    pub tag_ids: Vec<TagId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub references: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub document_id: DocumentId,
    pub name: String,
    pub chunk_count: usize,
    pub fact_count: usize,
    pub tag_ids: Vec<TagId>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_length: usize,
    pub tag_context_chars: usize,
    pub extraction_model: String,
    pub extraction_temperature: f32,
    pub retry: RetryPolicy,
    pub allow_duplicates: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_length: DEFAULT_CHUNK_LENGTH,
            tag_context_chars: DEFAULT_TAG_CONTEXT_CHARS,
            extraction_model: DEFAULT_EXTRACTION_MODEL.to_string(),
            extraction_temperature: 0.2,
            retry: RetryPolicy::default(),
            allow_duplicates: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub chat_model: String,
    /// `None` leaves the provider default in place.
    pub temperature: Option<f32>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: None,
        }
    }
}
