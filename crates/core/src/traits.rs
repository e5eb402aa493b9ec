use crate::error::{LlmError, StoreError};
use crate::llm::CompletionRequest;
use crate::models::{DocumentId, FactHit, NewDocument, Tag};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the text of the first completion choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// The persistence operations the ingestion and chat pipelines depend on.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn tag_vocabulary(&self) -> Result<Vec<Tag>, StoreError>;

    async fn find_document_by_checksum(
        &self,
        checksum: &str,
    ) -> Result<Option<DocumentId>, StoreError>;

    /// Writes the document, its facts and its tag links in one transaction.
    async fn commit_document(&self, document: NewDocument) -> Result<DocumentId, StoreError>;

    async fn nearest_facts(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<FactHit>, StoreError>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        (**self).embed(text).await
    }
}
