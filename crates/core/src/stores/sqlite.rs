//! [`SqliteStore`]: documents, tags, and embedded facts in one SQLite file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension as _};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{
    Document, DocumentId, DocumentSummary, FactChunk, FactHit, NewDocument, Tag, TagId,
};
use crate::stores::schema::SCHEMA;
use crate::stores::vector::{
    closest, cosine_distance, decode_f32, dequantize_uint8, encode_f32, quantize_uint8,
    VectorIndexConfig,
};
use crate::traits::KnowledgeStore;

/// Candidate ids bound per rescore query; stays under SQLite's variable limit.
const RESCORE_BATCH: usize = 500;

/// Cloning is cheap; clones share the connection and the rescore setting.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
    dimensions: usize,
    query_rescore: Arc<AtomicUsize>,
}

struct EncodedFact {
    text: String,
    embedding: Vec<u8>,
    codes: Vec<u8>,
    scale: f64,
    offset: f64,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub async fn open(
        path: impl AsRef<Path>,
        index: VectorIndexConfig,
    ) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn, index).await
    }

    pub async fn open_in_memory(index: VectorIndexConfig) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn, index).await
    }

    async fn init(
        conn: tokio_rusqlite::Connection,
        index: VectorIndexConfig,
    ) -> Result<Self, StoreError> {
        let configured = index.dimensions;
        let stored: Option<String> = conn
            .call(move |conn| {
                conn.execute_batch(SCHEMA)?;
                let stored: Option<String> = conn
                    .query_row(
                        "SELECT value FROM index_meta WHERE key = 'dimensions'",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                if stored.is_none() {
                    conn.execute(
                        "INSERT INTO index_meta (key, value) VALUES ('dimensions', ?1)",
                        params![configured.to_string()],
                    )?;
                }
                Ok(stored)
            })
            .await?;

        if let Some(stored) = stored {
            let stored = stored
                .parse::<usize>()
                .map_err(|_| StoreError::CorruptIndexMeta {
                    key: "dimensions".to_string(),
                    value: stored.clone(),
                })?;
            if stored != configured {
                return Err(StoreError::IndexMismatch { stored, configured });
            }
        }

        Ok(Self {
            conn,
            dimensions: configured,
            query_rescore: Arc::new(AtomicUsize::new(index.query_rescore)),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn query_rescore(&self) -> usize {
        self.query_rescore.load(Ordering::Relaxed)
    }

    /// Changes how many coarse candidates each search rescores at full precision.
    pub fn set_query_rescore(&self, query_rescore: usize) {
        self.query_rescore.store(query_rescore, Ordering::Relaxed);
        debug!(query_rescore, "query rescore updated");
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    // ─── Tags ────────────────────────────────────────────────────────────────

    pub async fn create_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::EmptyTagName);
        }

        let stored = name.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute("INSERT INTO tags (name) VALUES (?1)", params![stored])?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(Tag { id, name })
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let tags = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY id")?;
                let tags = stmt
                    .query_map([], |row| {
                        Ok(Tag {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(tags)
            })
            .await?;
        Ok(tags)
    }

    /// Deletes the tag and its document links; documents are untouched.
    pub async fn delete_tag(&self, id: TagId) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM tags WHERE id = ?1", params![id])?))
            .await?;

        if deleted == 0 {
            return Err(StoreError::TagNotFound(id));
        }
        Ok(())
    }

    // ─── Documents ───────────────────────────────────────────────────────────

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let document = self
            .conn
            .call(move |conn| {
                let document = conn
                    .query_row(
                        "SELECT id, name, checksum, created_at FROM documents WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(Document {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                checksum: row.get(2)?,
                                created_at: decode_timestamp(row.get(3)?),
                            })
                        },
                    )
                    .optional()?;
                Ok(document)
            })
            .await?;
        Ok(document)
    }

    /// Every document with its tag names (alphabetical) and fact count.
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let (documents, links) = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT d.id, d.name, d.checksum, d.created_at,
                            (SELECT COUNT(*) FROM document_information_chunks c
                              WHERE c.document_id = d.id)
                       FROM documents d
                      ORDER BY d.id",
                )?;
                let documents = stmt
                    .query_map([], |row| {
                        let document = Document {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            checksum: row.get(2)?,
                            created_at: decode_timestamp(row.get(3)?),
                        };
                        let fact_count: i64 = row.get(4)?;
                        Ok((document, fact_count))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(
                    "SELECT dt.document_id, t.name
                       FROM document_tags dt
                       JOIN tags t ON t.id = dt.tag_id
                      ORDER BY t.name",
                )?;
                let links = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, DocumentId>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok((documents, links))
            })
            .await?;

        let mut tags_by_document: HashMap<DocumentId, Vec<String>> = HashMap::new();
        for (document_id, name) in links {
            tags_by_document.entry(document_id).or_default().push(name);
        }

        Ok(documents
            .into_iter()
            .map(|(document, fact_count)| DocumentSummary {
                tags: tags_by_document.remove(&document.id).unwrap_or_default(),
                fact_count: usize::try_from(fact_count).unwrap_or_default(),
                document,
            })
            .collect())
    }

    pub async fn document_facts(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<FactChunk>, StoreError> {
        let facts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, document_id, chunk FROM document_information_chunks
                      WHERE document_id = ?1 ORDER BY id",
                )?;
                let facts = stmt
                    .query_map(params![document_id], |row| {
                        Ok(FactChunk {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            chunk: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(facts)
            })
            .await?;
        Ok(facts)
    }

    pub async fn document_tag_ids(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<TagId>, StoreError> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT tag_id FROM document_tags WHERE document_id = ?1 ORDER BY tag_id",
                )?;
                let ids = stmt
                    .query_map(params![document_id], |row| row.get(0))?
                    .collect::<Result<Vec<TagId>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Deletes the document together with its facts and tag links.
    pub async fn delete_document(&self, id: DocumentId) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?))
            .await?;

        if deleted == 0 {
            return Err(StoreError::DocumentNotFound(id));
        }
        Ok(())
    }
}

fn decode_timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn tag_vocabulary(&self) -> Result<Vec<Tag>, StoreError> {
        self.list_tags().await
    }

    async fn find_document_by_checksum(
        &self,
        checksum: &str,
    ) -> Result<Option<DocumentId>, StoreError> {
        let checksum = checksum.to_string();
        let id = self
            .conn
            .call(move |conn| {
                let id = conn
                    .query_row(
                        "SELECT id FROM documents WHERE checksum = ?1 ORDER BY id LIMIT 1",
                        params![checksum],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn commit_document(&self, document: NewDocument) -> Result<DocumentId, StoreError> {
        for fact in &document.facts {
            self.check_dimensions(&fact.embedding)?;
        }

        let NewDocument {
            name,
            checksum,
            facts,
            tag_ids,
        } = document;
        let fact_count = facts.len();
        let tag_count = tag_ids.len();
        let encoded: Vec<EncodedFact> = facts
            .into_iter()
            .map(|fact| {
                let (codes, scale, offset) = quantize_uint8(&fact.embedding);
                EncodedFact {
                    embedding: encode_f32(&fact.embedding),
                    text: fact.text,
                    codes,
                    scale: scale as f64,
                    offset: offset as f64,
                }
            })
            .collect();
        let created_at = Utc::now().timestamp();
        let log_name = name.clone();

        let document_id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO documents (name, checksum, created_at) VALUES (?1, ?2, ?3)",
                    params![name, checksum, created_at],
                )?;
                let document_id = tx.last_insert_rowid();

                {
                    let mut insert_fact = tx.prepare(
                        "INSERT INTO document_information_chunks
                             (document_id, chunk, embedding, embedding_q, q_scale, q_offset)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for fact in &encoded {
                        insert_fact.execute(params![
                            document_id,
                            fact.text,
                            fact.embedding,
                            fact.codes,
                            fact.scale,
                            fact.offset,
                        ])?;
                    }

                    let mut insert_tag = tx.prepare(
                        "INSERT OR IGNORE INTO document_tags (document_id, tag_id) VALUES (?1, ?2)",
                    )?;
                    for tag_id in &tag_ids {
                        insert_tag.execute(params![document_id, tag_id])?;
                    }
                }

                tx.commit()?;
                Ok(document_id)
            })
            .await?;

        info!(
            document_id,
            name = %log_name,
            fact_count,
            tag_count,
            "document committed"
        );
        Ok(document_id)
    }

    async fn nearest_facts(&self, query: &[f32], limit: usize) -> Result<Vec<FactHit>, StoreError> {
        self.check_dimensions(query)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let coarse_rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, embedding_q, q_scale, q_offset FROM document_information_chunks",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, f64>(2)?,
                            row.get::<_, f64>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let coarse = coarse_rows
            .into_iter()
            .map(|(id, codes, scale, offset)| {
                let approx = dequantize_uint8(&codes, scale as f32, offset as f32);
                (id, cosine_distance(query, &approx))
            })
            .collect();
        let candidates = closest(coarse, self.query_rescore().max(limit));
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
        let full_rows = self
            .conn
            .call(move |conn| {
                let mut rows = Vec::with_capacity(ids.len());
                for batch in ids.chunks(RESCORE_BATCH) {
                    let placeholders = vec!["?"; batch.len()].join(", ");
                    let mut stmt = conn.prepare_cached(&format!(
                        "SELECT id, document_id, chunk, embedding FROM document_information_chunks
                          WHERE id IN ({placeholders})"
                    ))?;
                    let batch_rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, DocumentId>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    })?;
                    for row in batch_rows {
                        rows.push(row?);
                    }
                }
                Ok(rows)
            })
            .await?;

        let mut rescored = Vec::with_capacity(full_rows.len());
        for (id, document_id, chunk, blob) in full_rows {
            let embedding = decode_f32(&blob).ok_or_else(|| StoreError::CorruptEmbedding {
                id,
                details: format!("blob of {} bytes is not a list of f32", blob.len()),
            })?;
            let distance = cosine_distance(query, &embedding);
            rescored.push((
                FactHit {
                    id,
                    document_id,
                    chunk,
                    distance,
                },
                distance,
            ));
        }

        let hits: Vec<FactHit> = closest(rescored, limit).into_iter().map(|(hit, _)| hit).collect();
        debug!(hits = hits.len(), limit, "nearest facts");
        Ok(hits)
    }
}
