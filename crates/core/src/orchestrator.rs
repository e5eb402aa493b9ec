use crate::chunking::chunk_text;
use crate::embeddings::embed_all;
use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::facts::FactExtractor;
use crate::ingest::{
    digest_bytes, discover_pdf_files, document_name, FolderIngestionReport, SkippedPdf,
};
use crate::models::{EmbeddedFact, IngestionOptions, IngestionReport, NewDocument};
use crate::tagging::TagMatcher;
use crate::traits::{ChatModel, Embedder, KnowledgeStore};
use futures::future::try_join_all;
use std::path::Path;
use tracing::{debug, info, warn};

/// Runs the upload pipeline: extract, chunk, extract facts and match tags
/// concurrently, embed, then commit everything in one transaction.
///
/// Nothing is written unless every step before the commit succeeded.
pub struct IngestionOrchestrator<M, E, S, X = LopdfExtractor> {
    extractor: X,
    facts: FactExtractor<M>,
    tags: TagMatcher<M>,
    embedder: E,
    store: S,
    options: IngestionOptions,
}

impl<M, E, S> IngestionOrchestrator<M, E, S, LopdfExtractor>
where
    M: ChatModel + Clone,
    E: Embedder,
    S: KnowledgeStore,
{
    pub fn new(model: M, embedder: E, store: S, options: IngestionOptions) -> Self {
        let facts = FactExtractor::new(
            model.clone(),
            options.extraction_model.clone(),
            options.extraction_temperature,
            options.retry,
        );
        let tags = TagMatcher::new(
            model,
            options.extraction_model.clone(),
            options.extraction_temperature,
            options.tag_context_chars,
            options.retry,
        );

        Self {
            extractor: LopdfExtractor,
            facts,
            tags,
            embedder,
            store,
            options,
        }
    }
}

impl<M, E, S, X> IngestionOrchestrator<M, E, S, X>
where
    M: ChatModel,
    E: Embedder,
    S: KnowledgeStore,
    X: PdfExtractor,
{
    pub fn with_extractor<Y: PdfExtractor>(
        self,
        extractor: Y,
    ) -> IngestionOrchestrator<M, E, S, Y> {
        IngestionOrchestrator {
            extractor,
            facts: self.facts,
            tags: self.tags,
            embedder: self.embedder,
            store: self.store,
            options: self.options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingests one uploaded PDF under the display name `name`.
    pub async fn ingest(&self, name: &str, pdf: &[u8]) -> Result<IngestionReport, IngestError> {
        let checksum = digest_bytes(pdf);
        if !self.options.allow_duplicates {
            if let Some(existing) = self.store.find_document_by_checksum(&checksum).await? {
                return Err(IngestError::DuplicateDocument {
                    name: name.to_string(),
                    existing,
                });
            }
        }

        let text = self.extractor.extract_text(pdf)?;
        self.ingest_text(name, &checksum, &text).await
    }

    /// Runs everything after text extraction.
    pub async fn ingest_text(
        &self,
        name: &str,
        checksum: &str,
        text: &str,
    ) -> Result<IngestionReport, IngestError> {
        let chunks = chunk_text(text, self.options.chunk_length);
        debug!(name, chunk_count = chunks.len(), "document chunked");

        let vocabulary = self.store.tag_vocabulary().await?;
        let fact_batches = try_join_all(
            chunks
                .iter()
                .enumerate()
                .map(|(index, chunk)| self.facts.extract(index, chunk)),
        );
        let matched_tags = self.tags.match_tags(text, &vocabulary);
        let (fact_batches, tag_ids) = tokio::try_join!(fact_batches, matched_tags)?;

        let facts: Vec<String> = fact_batches.into_iter().flatten().collect();
        if facts.is_empty() {
            return Err(IngestError::NoFacts(name.to_string()));
        }

        let embeddings = embed_all(&self.embedder, &facts)
            .await
            .map_err(IngestError::Embedding)?;

        let fact_count = facts.len();
        let document = NewDocument {
            name: name.to_string(),
            checksum: checksum.to_string(),
            facts: facts
                .into_iter()
                .zip(embeddings)
                .map(|(text, embedding)| EmbeddedFact { text, embedding })
                .collect(),
            tag_ids: tag_ids.clone(),
        };
        let document_id = self.store.commit_document(document).await?;

        Ok(IngestionReport {
            document_id,
            name: name.to_string(),
            chunk_count: chunks.len(),
            fact_count,
            tag_ids,
        })
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestionReport, IngestError> {
        let name = document_name(path)?;
        let pdf = tokio::fs::read(path).await?;
        self.ingest(&name, &pdf).await
    }

    /// Ingests every PDF under `folder`, each in its own transaction.
    ///
    /// A failing file is recorded as skipped and does not affect the others.
    pub async fn ingest_folder_best_effort(
        &self,
        folder: &Path,
    ) -> Result<FolderIngestionReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderIngestionReport::default();
        for path in files {
            match self.ingest_file(&path).await {
                Ok(ingested) => {
                    info!(
                        path = %path.display(),
                        document_id = ingested.document_id,
                        "pdf ingested"
                    );
                    report.ingested.push(ingested);
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipped pdf");
                    report.skipped.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::error::LlmError;
    use crate::extractor::PageText;
    use crate::retry::RetryPolicy;
    use crate::stores::{SqliteStore, VectorIndexConfig};
    use crate::testing::ScriptedModel;
    use async_trait::async_trait;
    use std::time::Duration;

    const DIMS: usize = 16;

    /// Treats the upload bytes as the already-extracted text.
    struct PlainText;

    impl PdfExtractor for PlainText {
        fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<PageText>, IngestError> {
            Ok(vec![PageText {
                number: 1,
                text: String::from_utf8_lossy(pdf).into_owned(),
            }])
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dimensions(&self) -> usize {
            DIMS
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::EmptyCompletion)
        }
    }

    fn options() -> IngestionOptions {
        IngestionOptions {
            retry: RetryPolicy::immediate(5),
            ..IngestionOptions::default()
        }
    }

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory(VectorIndexConfig {
            dimensions: DIMS,
            query_rescore: 10,
        })
        .await
        .expect("in-memory store")
    }

    fn pipeline<E: Embedder>(
        model: ScriptedModel,
        embedder: E,
        store: SqliteStore,
    ) -> IngestionOrchestrator<ScriptedModel, E, SqliteStore, PlainText> {
        IngestionOrchestrator::new(model, embedder, store, options()).with_extractor(PlainText)
    }

    async fn assert_nothing_written(store: &SqliteStore) {
        assert!(store.list_documents().await.unwrap().is_empty());
        let probe = HashingEmbedder { dimensions: DIMS }.embed_sync("anything");
        assert!(store.nearest_facts(&probe, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_commits_document_facts_and_tags() {
        let store = store().await;
        let finance = store.create_tag("Finance").await.unwrap();
        store.create_tag("Legal").await.unwrap();
        let model = ScriptedModel::new()
            .with_facts(r#"{"facts": ["Revenue grew 10%.", "Costs fell."]}"#)
            .with_tags(r#"{"tags": ["finance", "zzz"]}"#);
        let orchestrator = pipeline(
            model.clone(),
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
        );

        let text = "x".repeat(9_000);
        let report = orchestrator.ingest("report.pdf", text.as_bytes()).await.expect("ingested");

        assert_eq!(report.chunk_count, 3);
        assert_eq!(report.fact_count, 6);
        assert_eq!(report.tag_ids, vec![finance.id]);
        assert_eq!(model.fact_calls(), 3);
        assert_eq!(model.tag_calls(), 1);

        let listed = store.list_documents().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].document.name, "report.pdf");
        assert_eq!(listed[0].fact_count, 6);
        assert_eq!(listed[0].tags, vec!["Finance"]);
    }

    #[tokio::test]
    async fn one_failing_chunk_aborts_the_whole_upload() {
        let store = store().await;
        let model = ScriptedModel::new()
            .with_facts(r#"{"facts": ["A fact."]}"#)
            .failing_chunk("POISON");
        let orchestrator = pipeline(model, HashingEmbedder { dimensions: DIMS }, store.clone());

        let text = format!("{}POISON", "y".repeat(4_000));
        let error = orchestrator.ingest("doc.pdf", text.as_bytes()).await.expect_err("aborted");

        assert!(matches!(error, IngestError::ChunkExtraction { index: 1, attempts: 6, .. }));
        assert_nothing_written(&store).await;
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_are_retried_side_by_side() {
        let store = store().await;
        let model = ScriptedModel::new()
            .with_facts(r#"{"facts": ["A fact."]}"#)
            .failing_fact_calls(3);
        let orchestrator = IngestionOrchestrator::new(
            model.clone(),
            HashingEmbedder { dimensions: DIMS },
            store,
            IngestionOptions::default(),
        )
        .with_extractor(PlainText);
        let started = tokio::time::Instant::now();

        let text = "z".repeat(12_000);
        let report = orchestrator.ingest("doc.pdf", text.as_bytes()).await.expect("ingested");

        // every chunk fails its first call and succeeds after one shared 2s wait
        assert_eq!(report.chunk_count, 3);
        assert_eq!(model.fact_calls(), 6);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_chunks_exhaust_their_retries_together() {
        let store = store().await;
        let model = ScriptedModel::new().failing_chunk("z");
        let orchestrator = IngestionOrchestrator::new(
            model.clone(),
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
            IngestionOptions::default(),
        )
        .with_extractor(PlainText);
        let started = tokio::time::Instant::now();

        let text = "z".repeat(12_000);
        let error = orchestrator.ingest("doc.pdf", text.as_bytes()).await.expect_err("aborted");

        assert!(matches!(error, IngestError::ChunkExtraction { attempts: 6, .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");
        // all three chunks went through five retries before the first gave up
        assert!(model.fact_calls() >= 16, "fact calls {}", model.fact_calls());
        assert_nothing_written(&store).await;
    }

    #[tokio::test(start_paused = true)]
    async fn tag_matching_overlaps_fact_extraction() {
        let store = store().await;
        store.create_tag("finance").await.unwrap();
        let model = ScriptedModel::new()
            .with_facts(r#"{"facts": ["A fact."]}"#)
            .failing_fact_calls(1)
            .failing_tags();
        let orchestrator = IngestionOrchestrator::new(
            model.clone(),
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
            IngestionOptions::default(),
        )
        .with_extractor(PlainText);
        let started = tokio::time::Instant::now();

        let error = orchestrator.ingest("doc.pdf", b"some text").await.expect_err("aborted");

        // facts finish at 2s while tags keep retrying until 10s
        assert!(matches!(error, IngestError::TagMatch { attempts: 6, .. }));
        assert_eq!(model.fact_calls(), 2);
        assert_eq!(model.tag_calls(), 6);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");
        assert_nothing_written(&store).await;
    }

    #[tokio::test]
    async fn tag_matching_failure_aborts_the_upload() {
        let store = store().await;
        store.create_tag("finance").await.unwrap();
        let model = ScriptedModel::new()
            .with_facts(r#"{"facts": ["A fact."]}"#)
            .failing_tags();
        let orchestrator = pipeline(model, HashingEmbedder { dimensions: DIMS }, store.clone());

        let error = orchestrator.ingest("doc.pdf", b"some text").await.expect_err("aborted");

        assert!(matches!(error, IngestError::TagMatch { .. }));
        assert_nothing_written(&store).await;
    }

    #[tokio::test]
    async fn embedding_failure_aborts_the_upload() {
        let store = store().await;
        let model = ScriptedModel::new().with_facts(r#"{"facts": ["A fact.", "Another."]}"#);
        let orchestrator = pipeline(model, BrokenEmbedder, store.clone());

        let error = orchestrator.ingest("doc.pdf", b"some text").await.expect_err("aborted");

        assert!(matches!(error, IngestError::Embedding(_)));
        assert_nothing_written(&store).await;
    }

    #[tokio::test]
    async fn document_without_facts_is_not_committed() {
        let store = store().await;
        let orchestrator = pipeline(
            ScriptedModel::new(),
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
        );

        let error = orchestrator
            .ingest("empty.pdf", b"nothing useful")
            .await
            .expect_err("no facts");

        assert!(matches!(error, IngestError::NoFacts(_)));
        assert_nothing_written(&store).await;
    }

    #[tokio::test]
    async fn empty_vocabulary_never_asks_for_tags() {
        let store = store().await;
        let model = ScriptedModel::new().with_facts(r#"{"facts": ["A fact."]}"#);
        let orchestrator = pipeline(model.clone(), HashingEmbedder { dimensions: DIMS }, store);

        let report = orchestrator.ingest("doc.pdf", b"text").await.expect("ingested");

        assert!(report.tag_ids.is_empty());
        assert_eq!(model.tag_calls(), 0);
    }

    #[tokio::test]
    async fn identical_upload_is_rejected_unless_duplicates_allowed() {
        let store = store().await;
        let model = ScriptedModel::new().with_facts(r#"{"facts": ["A fact."]}"#);
        let orchestrator = pipeline(
            model.clone(),
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
        );

        let first = orchestrator.ingest("doc.pdf", b"same bytes").await.expect("first upload");
        let error = orchestrator.ingest("copy.pdf", b"same bytes").await.expect_err("duplicate");
        assert!(matches!(
            error,
            IngestError::DuplicateDocument { existing, .. } if existing == first.document_id
        ));
        assert_eq!(model.fact_calls(), 1);

        let permissive = IngestionOrchestrator::new(
            model,
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
            IngestionOptions {
                allow_duplicates: true,
                ..options()
            },
        )
        .with_extractor(PlainText);
        permissive.ingest("copy.pdf", b"same bytes").await.expect("allowed");
        assert_eq!(store.list_documents().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_pdf_fails_before_any_model_call() {
        let store = store().await;
        let model = ScriptedModel::new().with_facts(r#"{"facts": ["A fact."]}"#);
        let orchestrator = IngestionOrchestrator::new(
            model.clone(),
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
            options(),
        );

        let error = orchestrator
            .ingest("broken.pdf", b"%PDF-1.4\n%broken")
            .await
            .expect_err("not a pdf");

        assert!(matches!(error, IngestError::Extraction(_)));
        assert!(model.requests().is_empty());
        assert_nothing_written(&store).await;
    }

    #[tokio::test]
    async fn folder_ingestion_skips_bad_files_and_keeps_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.pdf"),
            crate::extractor::tests::sample_pdf(&["Pump rated at 200 bar"]),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken").unwrap();

        let store = store().await;
        let model =
            ScriptedModel::new().with_facts(r#"{"facts": ["The pump is rated at 200 bar."]}"#);
        let orchestrator = IngestionOrchestrator::new(
            model,
            HashingEmbedder { dimensions: DIMS },
            store.clone(),
            options(),
        );

        let report = orchestrator
            .ingest_folder_best_effort(dir.path())
            .await
            .expect("folder has pdfs");

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.ingested[0].name, "good.pdf");
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken.pdf"));
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_folder_is_an_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = IngestionOrchestrator::new(
            ScriptedModel::new(),
            HashingEmbedder { dimensions: DIMS },
            store().await,
            options(),
        );

        assert!(matches!(
            orchestrator.ingest_folder_best_effort(dir.path()).await,
            Err(IngestError::InvalidArgument(_))
        ));
    }
}
