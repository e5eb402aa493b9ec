use crate::error::IngestError;
use crate::llm::{parse_structured, string_list_schema, CompletionRequest, PromptMessage};
use crate::prompts::FACT_EXTRACTION_PROMPT;
use crate::retry::RetryPolicy;
use crate::traits::ChatModel;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneratedFacts {
    facts: Vec<String>,
}

/// Turns one text chunk into standalone factual statements.
#[derive(Debug, Clone)]
pub struct FactExtractor<M> {
    model: M,
    model_name: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl<M: ChatModel> FactExtractor<M> {
    pub fn new(
        model: M,
        model_name: impl Into<String>,
        temperature: f32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature,
            retry,
        }
    }

    /// Extracts facts from chunk `index`, retrying transport and parse failures.
    ///
    /// Blank statements returned by the model are dropped.
    pub async fn extract(&self, index: usize, chunk: &str) -> Result<Vec<String>, IngestError> {
        let request = CompletionRequest {
            model: self.model_name.clone(),
            temperature: Some(self.temperature),
            messages: vec![
                PromptMessage::system(FACT_EXTRACTION_PROMPT),
                PromptMessage::user(chunk),
            ],
            response_schema: Some(string_list_schema("document_facts", "facts")),
        };

        let operation = format!("fact extraction for chunk {index}");
        let model = &self.model;
        let request = &request;
        let generated = self
            .retry
            .run(&operation, move |_| async move {
                let raw = model.complete(request).await?;
                parse_structured::<GeneratedFacts>(&raw)
            })
            .await
            .map_err(|exhausted| IngestError::ChunkExtraction {
                index,
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })?;

        Ok(generated
            .facts
            .into_iter()
            .map(|fact| fact.trim().to_string())
            .filter(|fact| !fact.is_empty())
            .collect())
    }
}
