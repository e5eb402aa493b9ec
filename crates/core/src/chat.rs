use crate::error::ChatError;
use crate::llm::{CompletionRequest, PromptMessage};
use crate::models::{ChatMessage, RetrievalOptions, Role};
use crate::prompts::response_prompt;
use crate::traits::{ChatModel, Embedder, KnowledgeStore};
use tracing::debug;

/// Caller-owned conversation history; only ever appended to.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn push_user(&mut self, content: &str, references: Vec<String>) {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: content.to_string(),
            references: Some(references),
        });
    }

    fn push_assistant(&mut self, content: String) -> ChatMessage {
        let message = ChatMessage {
            role: Role::Assistant,
            content,
            references: None,
        };
        self.messages.push(message.clone());
        message
    }
}

/// Answers questions from the stored facts closest to the question.
pub struct ChatEngine<M, E, S> {
    model: M,
    embedder: E,
    store: S,
    options: RetrievalOptions,
}

impl<M, E, S> ChatEngine<M, E, S>
where
    M: ChatModel,
    E: Embedder,
    S: KnowledgeStore,
{
    pub fn new(model: M, embedder: E, store: S, options: RetrievalOptions) -> Self {
        Self {
            model,
            embedder,
            store,
            options,
        }
    }

    /// Runs one chat turn against `session` and returns the assistant reply.
    ///
    /// Embedding or retrieval failures leave the session untouched. Once the
    /// related facts are known the question is recorded with them as
    /// references; if generation then fails, that question stays without a
    /// reply.
    pub async fn send_message(
        &self,
        session: &mut ChatSession,
        question: &str,
    ) -> Result<ChatMessage, ChatError> {
        if question.trim().is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let query = self
            .embedder
            .embed(question)
            .await
            .map_err(ChatError::Embedding)?;
        let hits = self
            .store
            .nearest_facts(&query, self.options.top_k)
            .await
            .map_err(ChatError::Retrieval)?;
        debug!(hits = hits.len(), "related facts retrieved");

        let references: Vec<String> = hits.into_iter().map(|hit| hit.chunk).collect();
        session.push_user(question, references.clone());

        let mut messages = Vec::with_capacity(session.len() + 1);
        messages.push(PromptMessage::system(response_prompt(&references)));
        messages.extend(
            session
                .messages()
                .iter()
                .map(|message| PromptMessage::new(message.role, message.content.clone())),
        );

        let request = CompletionRequest {
            model: self.options.chat_model.clone(),
            temperature: self.options.temperature,
            messages,
            response_schema: None,
        };

        let reply = self
            .model
            .complete(&request)
            .await
            .map_err(ChatError::ResponseGeneration)?;
        Ok(session.push_assistant(reply))
    }
}
