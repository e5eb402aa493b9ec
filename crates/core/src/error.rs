use thiserror::Error;

use crate::models::DocumentId;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {endpoint}: {status}: {details}")]
    BackendResponse {
        endpoint: String,
        status: u16,
        details: String,
    },

    #[error("malformed structured response: {0}")]
    MalformedResponse(String),

    #[error("model returned an empty completion")]
    EmptyCompletion,

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no api key configured for {0}")]
    MissingApiKey(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("database was created for {stored}-dimensional embeddings, configured {configured}")]
    IndexMismatch { stored: usize, configured: usize },

    #[error("corrupt embedding for fact {id}: {details}")]
    CorruptEmbedding { id: i64, details: String },

    #[error("index metadata `{key}` holds unreadable value `{value}`")]
    CorruptIndexMeta { key: String, value: String },

    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("tag not found: {0}")]
    TagNotFound(i64),

    #[error("tag name must not be empty")]
    EmptyTagName,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf extraction error: {0}")]
    Extraction(String),

    #[error("fact extraction for chunk {index} failed after {attempts} attempts: {source}")]
    ChunkExtraction {
        index: usize,
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("tag matching failed after {attempts} attempts: {source}")]
    TagMatch {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[source] LlmError),

    #[error("no facts could be extracted from {0}")]
    NoFacts(String),

    #[error("document {name} was already ingested as document {existing}")]
    DuplicateDocument { name: String, existing: DocumentId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("failed to embed question: {0}")]
    Embedding(#[source] LlmError),

    #[error("failed to retrieve related facts: {0}")]
    Retrieval(#[source] StoreError),

    #[error("failed to generate a response: {0}")]
    ResponseGeneration(#[source] LlmError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
