use crate::error::IngestError;
use crate::llm::{parse_structured, string_list_schema, CompletionRequest, PromptMessage};
use crate::models::{Tag, TagId};
use crate::prompts::tag_matching_prompt;
use crate::retry::RetryPolicy;
use crate::traits::ChatModel;
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatchedTags {
    tags: Vec<String>,
}

/// Picks which tags of the existing vocabulary apply to a document.
#[derive(Debug, Clone)]
pub struct TagMatcher<M> {
    model: M,
    model_name: String,
    temperature: f32,
    context_chars: usize,
    retry: RetryPolicy,
}

impl<M: ChatModel> TagMatcher<M> {
    pub fn new(
        model: M,
        model_name: impl Into<String>,
        temperature: f32,
        context_chars: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature,
            context_chars,
            retry,
        }
    }

    /// Returns the ids of the vocabulary tags the model selected for `text`.
    ///
    /// Names are compared case-insensitively; names outside the vocabulary are
    /// ignored. An empty vocabulary returns immediately without a model call.
    pub async fn match_tags(
        &self,
        text: &str,
        vocabulary: &[Tag],
    ) -> Result<Vec<TagId>, IngestError> {
        if vocabulary.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = vocabulary.iter().map(|tag| tag.name.to_lowercase()).collect();
        let excerpt: String = text.chars().take(self.context_chars).collect();
        let request = CompletionRequest {
            model: self.model_name.clone(),
            temperature: Some(self.temperature),
            messages: vec![
                PromptMessage::system(tag_matching_prompt(&names)),
                PromptMessage::user(excerpt),
            ],
            response_schema: Some(string_list_schema("matching_tags", "tags")),
        };

        let model = &self.model;
        let request = &request;
        let matched = self
            .retry
            .run("tag matching", move |_| async move {
                let raw = model.complete(request).await?;
                parse_structured::<MatchedTags>(&raw)
            })
            .await
            .map_err(|exhausted| IngestError::TagMatch {
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })?;

        Ok(resolve_tag_ids(vocabulary, &matched.tags))
    }
}

/// Maps model-chosen names back to vocabulary ids, in vocabulary order.
pub fn resolve_tag_ids(vocabulary: &[Tag], chosen: &[String]) -> Vec<TagId> {
    let chosen: HashSet<String> = chosen.iter().map(|name| name.trim().to_lowercase()).collect();
    vocabulary
        .iter()
        .filter(|tag| chosen.contains(&tag.name.to_lowercase()))
        .map(|tag| tag.id)
        .collect()
}
