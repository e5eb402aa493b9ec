pub mod chat;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod facts;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod stores;
pub mod tagging;
pub mod traits;

#[cfg(test)]
mod testing;

pub use chat::{ChatEngine, ChatSession};
pub use chunking::chunk_text;
pub use embeddings::{
    embed_all, HashingEmbedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{ChatError, IngestError, LlmError, StoreError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use facts::FactExtractor;
pub use ingest::{discover_pdf_files, FolderIngestionReport, SkippedPdf};
pub use llm::{CompletionRequest, OpenAiClient, PromptMessage, DEFAULT_BASE_URL};
pub use models::{
    ChatMessage, Document, DocumentId, DocumentSummary, FactChunk, FactHit, IngestionOptions,
    IngestionReport, RetrievalOptions, Role, Tag, TagId,
};
pub use orchestrator::IngestionOrchestrator;
pub use retry::RetryPolicy;
pub use stores::{SqliteStore, VectorIndexConfig};
pub use tagging::TagMatcher;
pub use traits::{ChatModel, Embedder, KnowledgeStore};
