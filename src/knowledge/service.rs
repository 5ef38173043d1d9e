//! Knowledge Service - 인덱싱/검색 진입점
//!
//! 수집 파이프라인, 생성 단계, 운영 도구가 사용하는 외부 인터페이스입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config)?;
//! let service = KnowledgeService::open(config, embedder).await?;
//!
//! service.index_document(Document::email("msg-1", "Policy", "hr@corp.com", "", body)).await?;
//! let result = service.search(&Query::new("remote work policy", 5)).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::Segmenter;
use super::cleaner::TextCleaner;
use super::document::{Document, Granularity, IndexEntry};
use super::fusion::{cite_chunks, RetrievalResult};
use super::hybrid::{HybridRetriever, Query};
use super::index::{ChangeSet, DualIndexStore, IndexSnapshot, IndexStats};
use super::router::Selection;
use super::store::{content_hash, ModelIdentity, StoredDocument};
use super::telemetry::{Telemetry, TelemetrySnapshot};

// ============================================================================
// Types
// ============================================================================

/// 문서 하나의 인덱싱 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    /// 새로 임베딩해 저장함
    Indexed,
    /// 내용이 같아 기존 청크를 유지함
    Unchanged,
}

/// `index_document` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub fine_chunk_count: usize,
    pub coarse_chunk_count: usize,
    pub status: IndexStatus,
}

/// 배치 인덱싱 결과
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub indexed: usize,
    pub unchanged: usize,
    /// 분할 불가 (빈 ID, 바이너리 등)
    pub skipped: usize,
    /// 임베딩 또는 저장 실패
    pub failed: usize,
    pub fine_chunks: usize,
    pub coarse_chunks: usize,
    /// (문서 ID, 에러 메시지)
    pub errors: Vec<(String, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.indexed + self.unchanged + self.skipped + self.failed
    }
}

/// 임베딩까지 끝난 문서 (커밋 대기)
enum Prepared {
    Unchanged {
        fine: usize,
        coarse: usize,
    },
    Changed {
        document: StoredDocument,
        entries: Vec<IndexEntry>,
        fine: usize,
        coarse: usize,
    },
}

// ============================================================================
// KnowledgeService
// ============================================================================

/// 인덱싱/검색 서비스
///
/// `close()` 이후 모든 작업은 `IndexUnavailable`을 반환합니다.
pub struct KnowledgeService {
    config: RagConfig,
    segmenter: Segmenter,
    retriever: HybridRetriever,
    telemetry: Telemetry,
    index: RwLock<Option<Arc<DualIndexStore>>>,
}

impl KnowledgeService {
    /// 저장소를 열고 스냅샷 복원
    ///
    /// 저장된 임베딩 모델이 다르면 저장된 문서 전체를 다시 임베딩합니다.
    pub async fn open(config: RagConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;

        let db_path = config.db_path();
        let index = DualIndexStore::open(&db_path).map_err(|e| {
            RagError::IndexUnavailable(format!("failed to open {}: {:#}", db_path.display(), e))
        })?;

        let identity = ModelIdentity {
            model_id: embedder.name().to_string(),
            dimension: embedder.dimension(),
        };
        let needs_reembed = match index.store().model_identity()? {
            Some(existing) if existing == identity => false,
            Some(existing) => {
                tracing::warn!(
                    "Embedding model changed ({} / {}d -> {} / {}d), re-embedding stored documents",
                    existing.model_id,
                    existing.dimension,
                    identity.model_id,
                    identity.dimension
                );
                true
            }
            None => false,
        };
        // 재임베딩이 끝나기 전에는 이전 식별자를 유지해야 다음 open에서 다시 시도한다
        if !needs_reembed {
            index.store().set_model_identity(&identity)?;
        }

        let segmenter = Segmenter::new(
            config.chunk_config(Granularity::Fine),
            config.chunk_config(Granularity::Coarse),
            TextCleaner::new(config.redact_sensitive),
        );
        let retriever = HybridRetriever::new(embedder, &config);
        let telemetry = Telemetry::new(config.latency_budget_ms, config.slow_query_threshold_ms());

        let service = Self {
            config,
            segmenter,
            retriever,
            telemetry,
            index: RwLock::new(Some(Arc::new(index))),
        };

        if needs_reembed {
            let report = service.reindex(None).await?;
            if report.failed == 0 {
                service.index()?.store().set_model_identity(&identity)?;
                tracing::info!("Re-embedded {} documents", report.indexed);
            } else {
                tracing::warn!(
                    "Re-embedded {} documents, {} failed; will retry on next open",
                    report.indexed,
                    report.failed
                );
            }
        }

        tracing::info!("Knowledge service opened at {:?}", db_path);
        Ok(service)
    }

    /// 저장소 닫기 (진행 중인 쿼리는 가진 스냅샷으로 끝까지 실행됨)
    pub fn close(&self) {
        let closed = match self.index.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if closed.is_some() {
            tracing::info!("Knowledge service closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.index().is_ok()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    fn index(&self) -> Result<Arc<DualIndexStore>> {
        let guard = match self.index.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| RagError::IndexUnavailable("knowledge service is closed".to_string()))
    }

    // ------------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------------

    /// 문서 하나 인덱싱 (같은 ID의 이전 청크는 원자적으로 대체)
    ///
    /// 내용이 바뀌지 않았으면 재임베딩 없이 `Unchanged`를 반환합니다.
    pub async fn index_document(&self, document: Document) -> Result<IndexOutcome> {
        let index = self.index()?;
        let snapshot = index.snapshot();

        let prepared = match self.prepare(&snapshot, document, false).await {
            Ok(prepared) => prepared,
            Err(e) => {
                match &e {
                    RagError::Segmentation { .. } => self.telemetry.record_skipped(),
                    _ => self.telemetry.record_failed(),
                }
                return Err(e);
            }
        };

        match prepared {
            Prepared::Unchanged { fine, coarse } => {
                self.telemetry.record_unchanged();
                Ok(IndexOutcome {
                    fine_chunk_count: fine,
                    coarse_chunk_count: coarse,
                    status: IndexStatus::Unchanged,
                })
            }
            Prepared::Changed {
                document,
                entries,
                fine,
                coarse,
            } => {
                let mut changes = ChangeSet::new();
                changes.replace_document(document, entries);
                if let Err(e) = commit(index, changes).await {
                    self.telemetry.record_failed();
                    return Err(e);
                }

                self.telemetry.record_indexed(fine + coarse);
                Ok(IndexOutcome {
                    fine_chunk_count: fine,
                    coarse_chunk_count: coarse,
                    status: IndexStatus::Indexed,
                })
            }
        }
    }

    /// 여러 문서 인덱싱
    ///
    /// 문서 하나의 실패는 나머지에 영향을 주지 않습니다.
    /// 임베딩은 `indexing.concurrency`개까지 동시에, 커밋은 `commit_batch_size` 단위로 합니다.
    pub async fn index_documents(&self, documents: Vec<Document>) -> Result<BatchReport> {
        self.index_batch(documents, false).await
    }

    /// 저장된 문서를 다시 분할/임베딩 (최근 인덱싱 순, `limit`개까지)
    pub async fn reindex(&self, limit: Option<usize>) -> Result<BatchReport> {
        let index = self.index()?;
        let stored = index.store().list_documents(limit)?;

        let mut documents = Vec::with_capacity(stored.len());
        let mut orphans = 0;
        for doc in stored {
            // 청크 단위 upsert로만 만들어진 기록은 원문이 없다
            if doc.content_hash.is_empty() {
                tracing::warn!("Skipping {}: no stored content to re-embed", doc.id);
                orphans += 1;
                continue;
            }
            documents.push(Document {
                id: doc.id,
                source_type: doc.source_type,
                text: doc.content,
                metadata: doc.metadata,
            });
        }

        tracing::info!("Reindexing {} documents", documents.len());
        let mut report = self.index_batch(documents, true).await?;
        report.skipped += orphans;
        Ok(report)
    }

    async fn index_batch(&self, documents: Vec<Document>, force: bool) -> Result<BatchReport> {
        let index = self.index()?;
        let concurrency = self.config.indexing.concurrency.max(1);
        let group_size = self.config.indexing.commit_batch_size.max(1);

        let mut report = BatchReport::default();
        let mut documents = latest_per_id(documents).into_iter().peekable();

        while documents.peek().is_some() {
            let group: Vec<Document> = documents.by_ref().take(group_size).collect();
            let snapshot = index.snapshot();

            let ids: Vec<String> = group.iter().map(|d| d.id.clone()).collect();
            let results: Vec<Result<Prepared>> = stream::iter(group)
                .map(|doc| self.prepare(&snapshot, doc, force))
                .buffered(concurrency)
                .collect()
                .await;

            let mut pending: Vec<(StoredDocument, Vec<IndexEntry>, usize, usize)> = Vec::new();

            for (id, result) in ids.into_iter().zip(results) {
                match result {
                    Ok(Prepared::Unchanged { .. }) => {
                        report.unchanged += 1;
                        self.telemetry.record_unchanged();
                    }
                    Ok(Prepared::Changed {
                        document,
                        entries,
                        fine,
                        coarse,
                    }) => pending.push((document, entries, fine, coarse)),
                    Err(e @ RagError::Segmentation { .. }) => {
                        tracing::warn!("Skipping document: {}", e);
                        report.skipped += 1;
                        report.errors.push((id, e.to_string()));
                        self.telemetry.record_skipped();
                    }
                    Err(e) => {
                        tracing::warn!("Failed to index {}: {}", id, e);
                        report.failed += 1;
                        report.errors.push((id, e.to_string()));
                        self.telemetry.record_failed();
                    }
                }
            }

            if pending.is_empty() {
                continue;
            }

            let mut changes = ChangeSet::new();
            let mut tallies = Vec::with_capacity(pending.len());
            for (document, entries, fine, coarse) in pending {
                tallies.push((document.id.clone(), fine, coarse));
                changes.replace_document(document, entries);
            }

            match commit(Arc::clone(&index), changes).await {
                Ok(()) => {
                    for (_, fine, coarse) in tallies {
                        report.indexed += 1;
                        report.fine_chunks += fine;
                        report.coarse_chunks += coarse;
                        self.telemetry.record_indexed(fine + coarse);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to commit {} documents: {}", tallies.len(), e);
                    for (id, _, _) in tallies {
                        report.failed += 1;
                        report.errors.push((id, e.to_string()));
                        self.telemetry.record_failed();
                    }
                }
            }
        }

        tracing::info!(
            "Indexed {} documents ({} unchanged, {} skipped, {} failed): {} fine / {} coarse chunks",
            report.indexed,
            report.unchanged,
            report.skipped,
            report.failed,
            report.fine_chunks,
            report.coarse_chunks
        );
        Ok(report)
    }

    /// 분할 → 변경 감지 → 임베딩
    async fn prepare(
        &self,
        snapshot: &IndexSnapshot,
        document: Document,
        force: bool,
    ) -> Result<Prepared> {
        let segmented = self.segmenter.segment(&document)?;
        let hash = content_hash(&format!("{}\0{}", document.id, segmented.prepared_text));

        let unchanged = snapshot
            .document(&document.id)
            .is_some_and(|existing| existing.content_hash == hash);
        if unchanged && !force {
            tracing::debug!("Unchanged: {}", document.id);
            return Ok(Prepared::Unchanged {
                fine: snapshot
                    .chunks_for_document(&document.id, Some(Granularity::Fine))
                    .len(),
                coarse: snapshot
                    .chunks_for_document(&document.id, Some(Granularity::Coarse))
                    .len(),
            });
        }

        let texts: Vec<String> = segmented.all_chunks().map(|c| c.text.clone()).collect();
        let embeddings = self.embed_with_retry(&document.id, &texts).await?;

        let fine = segmented.fine.len();
        let coarse = segmented.coarse.len();
        let entries = segmented
            .fine
            .into_iter()
            .chain(segmented.coarse)
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                chunk,
                embedding,
                source_type: document.source_type,
                metadata: document.metadata.clone(),
            })
            .collect();

        Ok(Prepared::Changed {
            document: StoredDocument {
                id: document.id,
                source_type: document.source_type,
                content: segmented.prepared_text,
                content_hash: hash,
                metadata: document.metadata,
                indexed_at: Utc::now(),
            },
            entries,
            fine,
            coarse,
        })
    }

    /// 배치 임베딩, 실패하면 한 번 재시도
    async fn embed_with_retry(&self, doc_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embedder = self.retriever.embedder();
        let embeddings = match embedder.embed_many(texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                tracing::warn!("Embedding failed for {}, retrying once: {}", doc_id, e);
                self.telemetry.record_embedding_retry();
                embedder.embed_many(texts).await?
            }
        };

        let dimension = embedder.dimension();
        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings for {}, got {}",
                texts.len(),
                doc_id,
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(RagError::Embedding(format!(
                "expected dimension {}, got {}",
                dimension,
                bad.len()
            )));
        }
        Ok(embeddings)
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 하이브리드 검색
    ///
    /// 항상 (비어 있을 수 있는) 결과나 `IndexUnavailable`만 반환합니다.
    pub async fn search(&self, query: &Query) -> Result<RetrievalResult> {
        let index = match self.index() {
            Ok(index) => index,
            Err(e) => {
                self.telemetry.record_unavailable();
                return Err(e);
            }
        };

        let result = self.retriever.retrieve(index.snapshot(), query).await;
        self.telemetry
            .record_query(result.latency_ms, &result.timed_out_engines);
        Ok(result)
    }

    /// 문서 하나의 청크를 인용 목록으로 (fine → coarse, 오프셋 순)
    pub fn chunks_for_document(&self, doc_id: &str, k: usize) -> Result<RetrievalResult> {
        let snapshot = self.index()?.snapshot();
        let chunks = snapshot.chunks_for_document(doc_id, None);

        let mut result = RetrievalResult::empty(Selection::Both);
        result.items = cite_chunks(&chunks, k);
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------------

    pub fn get_index_stats(&self) -> Result<IndexStats> {
        Ok(self.index()?.stats())
    }

    /// 최근 인덱싱된 문서 목록
    pub fn list_documents(&self, limit: usize) -> Result<Vec<StoredDocument>> {
        Ok(self.index()?.store().list_documents(Some(limit))?)
    }

    /// 문서 삭제
    ///
    /// # Returns
    /// 제거된 청크 수
    pub async fn delete_document(&self, doc_id: &str) -> Result<usize> {
        let index = self.index()?;
        let doc_id = doc_id.to_string();
        let removed = tokio::task::spawn_blocking(move || index.delete_by_document(&doc_id))
            .await
            .map_err(|e| anyhow!("Delete task failed: {}", e))??;
        Ok(removed)
    }

    /// 인덱스 전체 삭제
    pub async fn clear_index(&self) -> Result<()> {
        let index = self.index()?;
        tokio::task::spawn_blocking(move || index.clear())
            .await
            .map_err(|e| anyhow!("Clear task failed: {}", e))??;
        Ok(())
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

/// 같은 ID가 여러 번 나오면 마지막 것만 남김 (남은 문서는 처음 순서 유지)
fn latest_per_id(documents: Vec<Document>) -> Vec<Document> {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (i, doc) in documents.iter().enumerate() {
        last.insert(doc.id.clone(), i);
    }
    if last.len() == documents.len() {
        return documents;
    }

    tracing::debug!(
        "Dropping {} superseded duplicates from batch",
        documents.len() - last.len()
    );
    documents
        .into_iter()
        .enumerate()
        .filter(|(i, doc)| last.get(&doc.id) == Some(i))
        .map(|(_, doc)| doc)
        .collect()
}

/// 변경 묶음을 블로킹 스레드에서 커밋
async fn commit(index: Arc<DualIndexStore>, changes: ChangeSet) -> Result<()> {
    tokio::task::spawn_blocking(move || index.commit(changes))
        .await
        .map_err(|e| anyhow!("Commit task failed: {}", e))??;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::document::SourceType;
    use tempfile::TempDir;

    async fn open_service(dir: &TempDir, dimension: usize) -> KnowledgeService {
        let config = RagConfig::with_data_dir(dir.path());
        KnowledgeService::open(config, Arc::new(HashEmbedding::new(dimension)))
            .await
            .unwrap()
    }

    fn long_email(id: &str) -> Document {
        let body = "The quarterly budget review covers travel, hardware and staffing. ".repeat(40);
        Document::email(id, "Budget review", "finance@corp.com", "2024-03-01", &body)
    }

    #[tokio::test]
    async fn test_index_document_counts() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;

        let outcome = service.index_document(long_email("msg-1")).await.unwrap();
        assert_eq!(outcome.status, IndexStatus::Indexed);
        assert!(outcome.fine_chunk_count >= 3);
        assert!(outcome.coarse_chunk_count >= 1);

        let stats = service.get_index_stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.fine_chunk_total, outcome.fine_chunk_count);
        assert_eq!(stats.coarse_chunk_total, outcome.coarse_chunk_count);
        assert_eq!(
            stats.per_source_type_totals[&SourceType::Email].documents,
            1
        );
    }

    #[tokio::test]
    async fn test_reindex_same_content_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;

        let first = service.index_document(long_email("msg-1")).await.unwrap();
        let second = service.index_document(long_email("msg-1")).await.unwrap();

        assert_eq!(second.status, IndexStatus::Unchanged);
        assert_eq!(first.fine_chunk_count, second.fine_chunk_count);
        assert_eq!(first.coarse_chunk_count, second.coarse_chunk_count);
        assert_eq!(service.telemetry().documents_unchanged, 1);
    }

    #[tokio::test]
    async fn test_empty_document_indexes_zero_chunks() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;

        let outcome = service
            .index_document(Document::new("blank", SourceType::Pdf, "   \n  "))
            .await
            .unwrap();
        assert_eq!(outcome.fine_chunk_count, 0);
        assert_eq!(outcome.coarse_chunk_count, 0);
    }

    #[tokio::test]
    async fn test_segmentation_error_is_returned() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;

        let err = service
            .index_document(Document::new("", SourceType::Email, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Segmentation { .. }));
        assert_eq!(service.telemetry().documents_skipped, 1);
    }

    #[tokio::test]
    async fn test_batch_skips_bad_documents() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;

        let report = service
            .index_documents(vec![
                long_email("msg-1"),
                Document::new("", SourceType::Email, "no id"),
                long_email("msg-2"),
            ])
            .await
            .unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total(), 3);
        assert_eq!(service.get_index_stats().unwrap().document_count, 2);
    }

    #[tokio::test]
    async fn test_delete_and_chunks_for_document() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;
        let outcome = service.index_document(long_email("msg-1")).await.unwrap();

        let listed = service.chunks_for_document("msg-1", 100).unwrap();
        assert_eq!(
            listed.len(),
            outcome.fine_chunk_count + outcome.coarse_chunk_count
        );
        assert_eq!(listed.items[0].citation, 1);
        assert_eq!(listed.items[0].granularity, Granularity::Fine);
        assert!(listed.items.iter().all(|i| i.score == 1.0));

        let removed = service.delete_document("msg-1").await.unwrap();
        assert_eq!(removed, listed.len());
        assert!(service.chunks_for_document("msg-1", 100).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_service_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;
        service.close();

        assert!(!service.is_open());
        let err = service
            .search(&Query::new("budget", 5))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(service.get_index_stats().unwrap_err().is_unavailable());
        assert!(service
            .index_document(long_email("msg-1"))
            .await
            .unwrap_err()
            .is_unavailable());
        assert_eq!(service.telemetry().unavailable_queries, 1);
    }

    #[tokio::test]
    async fn test_model_change_reembeds_documents() {
        let dir = TempDir::new().unwrap();
        {
            let service = open_service(&dir, 64).await;
            service.index_document(long_email("msg-1")).await.unwrap();
            service.close();
        }

        let service = open_service(&dir, 32).await;
        let snapshot = service.index().unwrap().snapshot();
        let chunks = snapshot.chunks_for_document("msg-1", None);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.entry.embedding.len() == 32));

        let result = service.search(&Query::new("budget review", 3)).await.unwrap();
        assert!(!result.is_empty());
    }

    /// 차원만 다르고 항상 실패하는 프로바이더
    struct OfflineEmbedding;

    #[async_trait::async_trait]
    impl EmbeddingProvider for OfflineEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::Embedding("model offline".to_string()))
        }
        fn dimension(&self) -> usize {
            32
        }
        fn name(&self) -> &str {
            "offline"
        }
    }

    #[tokio::test]
    async fn test_failed_model_change_is_retried_on_next_open() {
        let dir = TempDir::new().unwrap();
        {
            let service = open_service(&dir, 64).await;
            service.index_document(long_email("msg-1")).await.unwrap();
            service.close();
        }

        {
            let config = RagConfig::with_data_dir(dir.path());
            let service = KnowledgeService::open(config, Arc::new(OfflineEmbedding))
                .await
                .unwrap();
            let index = service.index().unwrap();
            let identity = index.store().model_identity().unwrap().unwrap();
            assert_eq!(identity.dimension, 64);

            // 남아 있는 64차원 벡터는 32차원 쿼리에 점수를 받지 않는다
            let snapshot = index.snapshot();
            assert!(!snapshot.chunks_for_document("msg-1", None).is_empty());
            assert!(snapshot
                .vector_search(&[0.5; 32], Granularity::Coarse, 10)
                .is_empty());
            service.close();
        }

        let service = open_service(&dir, 32).await;
        let index = service.index().unwrap();
        let chunks = index.snapshot().chunks_for_document("msg-1", None);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.entry.embedding.len() == 32));
        let identity = index.store().model_identity().unwrap().unwrap();
        assert_eq!(identity.dimension, 32);
    }

    fn budget_note(body: &str) -> Document {
        Document::email("msg-1", "Budget", "finance@corp.com", "2024-03-01", body)
    }

    #[tokio::test]
    async fn test_batch_duplicate_ids_last_wins() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;
        let original = "original budget notes for the quarter";
        let revised = "revised content with new travel limits";
        service.index_document(budget_note(original)).await.unwrap();

        // 마지막 사본이 저장된 내용과 같으면 아무것도 바뀌지 않는다
        let report = service
            .index_documents(vec![budget_note(revised), budget_note(original)])
            .await
            .unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.indexed, 0);
        let stored = service.list_documents(10).unwrap();
        assert!(stored[0].content.contains(original));

        let report = service
            .index_documents(vec![budget_note(original), budget_note(revised)])
            .await
            .unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.unchanged, 0);
        let stored = service.list_documents(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].content.contains(revised));
    }

    #[tokio::test]
    async fn test_clear_index() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, 64).await;
        service.index_document(long_email("msg-1")).await.unwrap();

        service.clear_index().await.unwrap();
        let stats = service.get_index_stats().unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.chunk_total(), 0);
    }
}
