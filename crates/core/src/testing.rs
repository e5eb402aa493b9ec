//! Scripted chat model shared by the pipeline tests.

use crate::error::LlmError;
use crate::llm::CompletionRequest;
use crate::traits::ChatModel;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Facts,
    Tags,
    Answer,
}

#[derive(Debug, Default)]
struct Script {
    facts: String,
    tags: String,
    answer: String,
    failing_fact_calls: usize,
    failing_chunk_marker: Option<String>,
    fail_tags: bool,
    fail_answer: bool,
    requests: Vec<CompletionRequest>,
    fact_calls: usize,
    tag_calls: usize,
    answer_calls: usize,
}

/// Answers by request kind: fact extraction, tag matching or free-text reply.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

fn backend_failure() -> LlmError {
    LlmError::BackendResponse {
        endpoint: "scripted".to_string(),
        status: 500,
        details: "simulated outage".to_string(),
    }
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        let model = Self::default();
        {
            let mut script = model.lock();
            script.facts = r#"{"facts": []}"#.to_string();
            script.tags = r#"{"tags": []}"#.to_string();
            script.answer = "I don't know.".to_string();
        }
        model
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn with_facts(self, raw: &str) -> Self {
        self.lock().facts = raw.to_string();
        self
    }

    pub(crate) fn with_tags(self, raw: &str) -> Self {
        self.lock().tags = raw.to_string();
        self
    }

    pub(crate) fn with_answer(self, answer: &str) -> Self {
        self.lock().answer = answer.to_string();
        self
    }

    pub(crate) fn failing_fact_calls(self, count: usize) -> Self {
        self.lock().failing_fact_calls = count;
        self
    }

    /// Fact requests whose chunk contains `marker` always fail.
    pub(crate) fn failing_chunk(self, marker: &str) -> Self {
        self.lock().failing_chunk_marker = Some(marker.to_string());
        self
    }

    pub(crate) fn failing_tags(self) -> Self {
        self.lock().fail_tags = true;
        self
    }

    pub(crate) fn failing_answer(self) -> Self {
        self.lock().fail_answer = true;
        self
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    pub(crate) fn fact_calls(&self) -> usize {
        self.lock().fact_calls
    }

    pub(crate) fn tag_calls(&self) -> usize {
        self.lock().tag_calls
    }

    pub(crate) fn answer_calls(&self) -> usize {
        self.lock().answer_calls
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut script = self.lock();
        script.requests.push(request.clone());

        let kind = match request.response_schema.as_ref().map(|schema| schema.name.as_str()) {
            Some("document_facts") => RequestKind::Facts,
            Some("matching_tags") => RequestKind::Tags,
            _ => RequestKind::Answer,
        };

        match kind {
            RequestKind::Facts => {
                script.fact_calls += 1;
                let chunk = request
                    .messages
                    .last()
                    .map(|message| message.content.as_str())
                    .unwrap_or_default();
                let poisoned = script
                    .failing_chunk_marker
                    .as_deref()
                    .is_some_and(|marker| chunk.contains(marker));
                if poisoned || script.fact_calls <= script.failing_fact_calls {
                    return Err(backend_failure());
                }
                Ok(script.facts.clone())
            }
            RequestKind::Tags => {
                script.tag_calls += 1;
                if script.fail_tags {
                    return Err(backend_failure());
                }
                Ok(script.tags.clone())
            }
            RequestKind::Answer => {
                script.answer_calls += 1;
                if script.fail_answer {
                    return Err(backend_failure());
                }
                Ok(script.answer.clone())
            }
        }
    }
}
