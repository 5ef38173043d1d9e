//! Dual Index Store - 벡터 + 어휘 이중 인덱스
//!
//! 모든 검색은 불변 스냅샷(`Arc<IndexSnapshot>`)에서 수행합니다.
//! 쓰기는 현재 스냅샷을 복제해 변경을 적용하고, SQLite 커밋이 끝난 뒤 교체합니다.
//! 따라서 쿼리는 문서 하나의 청크가 절반만 바뀐 상태를 절대 보지 않습니다.
//!
//! ```text
//! writer: clone → apply(batch) → persist → swap
//! reader: snapshot() ──────────────────────────→ (이전 또는 이후 스냅샷 전체)
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::document::{DocumentMetadata, Granularity, IndexEntry, SourceType};
use super::lexical::{LexicalIndex, TermStats};
use super::store::{KnowledgeStore, StoredDocument, StoredEntry, WriteBatch};
use super::vector::{exact_search, exact_search_until};

// ============================================================================
// Stored Chunk
// ============================================================================

/// 스냅샷에 올라간 청크 (벡터 + 어휘 표현을 함께 보관)
#[derive(Debug, Clone)]
pub struct StoredChunk {
    /// 삽입 순번 (동점 정렬 기준)
    pub seq: u64,
    pub entry: IndexEntry,
    terms: TermStats,
}

impl StoredChunk {
    pub fn new(seq: u64, entry: IndexEntry) -> Self {
        let terms = TermStats::from_text(&entry.chunk.text);
        Self { seq, entry, terms }
    }

    pub fn id(&self) -> &str {
        &self.entry.chunk.id
    }

    pub fn doc_id(&self) -> &str {
        &self.entry.chunk.doc_id
    }

    pub fn granularity(&self) -> Granularity {
        self.entry.chunk.granularity
    }
}

/// 엔진 하나의 검색 결과
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<StoredChunk>,
    pub score: f32,
}

// ============================================================================
// Segment (세분도 하나)
// ============================================================================

/// 한 세분도의 청크 집합 + 어휘 인덱스
#[derive(Debug, Clone, Default)]
pub struct Segment {
    chunks: BTreeMap<u64, Arc<StoredChunk>>,
    by_id: HashMap<Arc<str>, u64>,
    by_doc: HashMap<Arc<str>, Vec<u64>>,
    lexical: LexicalIndex,
}

impl Segment {
    fn insert(&mut self, chunk: StoredChunk) {
        // 같은 청크 ID는 대체
        if let Some(old) = self.by_id.get(chunk.id()).copied() {
            self.remove_seq(old);
        }

        let seq = chunk.seq;
        self.lexical.insert(seq, &chunk.terms);
        self.by_id.insert(Arc::from(chunk.id()), seq);
        self.by_doc.entry(Arc::from(chunk.doc_id())).or_default().push(seq);
        self.chunks.insert(seq, Arc::new(chunk));
    }

    fn remove_seq(&mut self, seq: u64) -> bool {
        let Some(chunk) = self.chunks.remove(&seq) else {
            return false;
        };

        self.lexical.remove(seq, &chunk.terms);
        self.by_id.remove(chunk.id());

        let now_empty = match self.by_doc.get_mut(chunk.doc_id()) {
            Some(seqs) => {
                seqs.retain(|s| *s != seq);
                seqs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_doc.remove(chunk.doc_id());
        }
        true
    }

    fn remove_document(&mut self, doc_id: &str) -> usize {
        let seqs = self.by_doc.remove(doc_id).unwrap_or_default();
        seqs.iter().filter(|seq| self.remove_seq(**seq)).count()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Arc<StoredChunk>> {
        self.by_id.get(chunk_id).and_then(|seq| self.chunks.get(seq))
    }

    /// 문서의 청크 (시작 오프셋 순)
    pub fn document_chunks(&self, doc_id: &str) -> Vec<Arc<StoredChunk>> {
        let mut chunks: Vec<Arc<StoredChunk>> = self
            .by_doc
            .get(doc_id)
            .map(|seqs| seqs.iter().filter_map(|s| self.chunks.get(s).cloned()).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| (c.entry.chunk.start, c.seq));
        chunks
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// 코사인 유사도 top-k
    pub fn vector_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let entries = self
            .chunks
            .iter()
            .map(|(seq, chunk)| (*seq, chunk.entry.embedding.as_slice()));
        self.resolve(exact_search(entries, query, k))
    }

    /// 마감 시각이 있는 코사인 top-k. 마감을 넘기면 None
    pub fn vector_search_until(
        &self,
        query: &[f32],
        k: usize,
        deadline: Instant,
    ) -> Option<Vec<ScoredChunk>> {
        let entries = self
            .chunks
            .iter()
            .map(|(seq, chunk)| (*seq, chunk.entry.embedding.as_slice()));
        exact_search_until(entries, query, k, deadline).map(|ranked| self.resolve(ranked))
    }

    /// BM25 top-k
    pub fn lexical_search(&self, query_terms: &[String], k: usize) -> Vec<ScoredChunk> {
        self.resolve(self.lexical.search(query_terms, k))
    }

    fn resolve(&self, ranked: Vec<(u64, f32)>) -> Vec<ScoredChunk> {
        ranked
            .into_iter()
            .filter_map(|(seq, score)| {
                self.chunks.get(&seq).map(|chunk| ScoredChunk {
                    chunk: Arc::clone(chunk),
                    score,
                })
            })
            .collect()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// 인덱스에 올라간 문서 기록
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub source_type: SourceType,
    pub content_hash: String,
    pub metadata: DocumentMetadata,
    pub indexed_at: DateTime<Utc>,
}

impl From<&StoredDocument> for DocumentRecord {
    fn from(doc: &StoredDocument) -> Self {
        Self {
            id: doc.id.clone(),
            source_type: doc.source_type,
            content_hash: doc.content_hash.clone(),
            metadata: doc.metadata.clone(),
            indexed_at: doc.indexed_at,
        }
    }
}

/// 출처 종류별 집계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceTotals {
    pub documents: usize,
    pub fine_chunks: usize,
    pub coarse_chunks: usize,
}

/// 인덱스 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub fine_chunk_total: usize,
    pub coarse_chunk_total: usize,
    pub per_source_type_totals: BTreeMap<SourceType, SourceTotals>,
}

impl IndexStats {
    pub fn chunk_total(&self) -> usize {
        self.fine_chunk_total + self.coarse_chunk_total
    }
}

/// 일관된 시점의 인덱스 전체
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    fine: Segment,
    coarse: Segment,
    documents: HashMap<String, Arc<DocumentRecord>>,
    next_seq: u64,
}

impl IndexSnapshot {
    /// 저장소 내용으로 스냅샷 복원 (postings는 텍스트에서 재계산)
    fn from_store(documents: Vec<StoredDocument>, entries: Vec<StoredEntry>) -> Self {
        let mut snapshot = Self::default();
        for doc in &documents {
            snapshot
                .documents
                .insert(doc.id.clone(), Arc::new(DocumentRecord::from(doc)));
        }
        for stored in entries {
            snapshot.next_seq = snapshot.next_seq.max(stored.seq + 1);
            snapshot.insert_entry(stored.seq, stored.entry);
        }
        snapshot
    }

    pub fn segment(&self, granularity: Granularity) -> &Segment {
        match granularity {
            Granularity::Fine => &self.fine,
            Granularity::Coarse => &self.coarse,
        }
    }

    fn segment_mut(&mut self, granularity: Granularity) -> &mut Segment {
        match granularity {
            Granularity::Fine => &mut self.fine,
            Granularity::Coarse => &mut self.coarse,
        }
    }

    pub fn document(&self, doc_id: &str) -> Option<&DocumentRecord> {
        self.documents.get(doc_id).map(|d| d.as_ref())
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self, granularity: Granularity) -> usize {
        self.segment(granularity).len()
    }

    pub fn is_empty(&self) -> bool {
        self.fine.is_empty() && self.coarse.is_empty()
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<&Arc<StoredChunk>> {
        self.fine.get(chunk_id).or_else(|| self.coarse.get(chunk_id))
    }

    pub fn vector_search(
        &self,
        query: &[f32],
        granularity: Granularity,
        k: usize,
    ) -> Vec<ScoredChunk> {
        self.segment(granularity).vector_search(query, k)
    }

    pub fn vector_search_until(
        &self,
        query: &[f32],
        granularity: Granularity,
        k: usize,
        deadline: Instant,
    ) -> Option<Vec<ScoredChunk>> {
        self.segment(granularity).vector_search_until(query, k, deadline)
    }

    pub fn lexical_search(
        &self,
        query_terms: &[String],
        granularity: Granularity,
        k: usize,
    ) -> Vec<ScoredChunk> {
        self.segment(granularity).lexical_search(query_terms, k)
    }

    /// 문서의 청크 목록 (fine → coarse, 각각 오프셋 순)
    pub fn chunks_for_document(
        &self,
        doc_id: &str,
        granularity: Option<Granularity>,
    ) -> Vec<Arc<StoredChunk>> {
        match granularity {
            Some(g) => self.segment(g).document_chunks(doc_id),
            None => Granularity::ALL
                .iter()
                .flat_map(|g| self.segment(*g).document_chunks(doc_id))
                .collect(),
        }
    }

    pub fn stats(&self) -> IndexStats {
        let mut per_source: BTreeMap<SourceType, SourceTotals> = BTreeMap::new();

        for doc in self.documents.values() {
            per_source.entry(doc.source_type).or_default().documents += 1;
        }
        for granularity in Granularity::ALL {
            for chunk in self.segment(granularity).chunks.values() {
                let totals = per_source.entry(chunk.entry.source_type).or_default();
                match granularity {
                    Granularity::Fine => totals.fine_chunks += 1,
                    Granularity::Coarse => totals.coarse_chunks += 1,
                }
            }
        }

        IndexStats {
            document_count: self.documents.len(),
            fine_chunk_total: self.fine.len(),
            coarse_chunk_total: self.coarse.len(),
            per_source_type_totals: per_source,
        }
    }

    fn insert_entry(&mut self, seq: u64, entry: IndexEntry) {
        let granularity = entry.chunk.granularity;
        self.segment_mut(granularity).insert(StoredChunk::new(seq, entry));
    }

    fn remove_document(&mut self, doc_id: &str) -> usize {
        self.documents.remove(doc_id);
        self.fine.remove_document(doc_id) + self.coarse.remove_document(doc_id)
    }

    /// 변경 묶음 적용 (삭제 → 문서 기록 → 청크 순)
    fn apply(&mut self, batch: &WriteBatch) {
        for doc_id in &batch.deleted_docs {
            self.remove_document(doc_id);
        }
        for doc in &batch.documents {
            self.documents
                .insert(doc.id.clone(), Arc::new(DocumentRecord::from(doc)));
        }
        for (seq, entry) in &batch.entries {
            self.next_seq = self.next_seq.max(seq + 1);
            self.insert_entry(*seq, entry.clone());
        }
    }
}

// ============================================================================
// Change Set
// ============================================================================

/// 인덱스에 반영할 변경 (순번은 커밋 시 부여)
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    deletes: Vec<String>,
    documents: Vec<(StoredDocument, Vec<IndexEntry>)>,
    orphan_entries: Vec<IndexEntry>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 문서 전체 교체 (이전 청크는 모두 제거)
    pub fn replace_document(&mut self, document: StoredDocument, entries: Vec<IndexEntry>) {
        self.documents.push((document, entries));
    }

    pub fn delete_document(&mut self, doc_id: impl Into<String>) {
        self.deletes.push(doc_id.into());
    }

    /// 청크 단위 upsert (같은 청크 ID만 대체)
    pub fn upsert_entries(&mut self, entries: Vec<IndexEntry>) {
        self.orphan_entries.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.deletes.len() + self.documents.len() + self.orphan_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_batch(self, current: &IndexSnapshot) -> WriteBatch {
        let mut next_seq = current.next_seq;
        let mut seq = || {
            let s = next_seq;
            next_seq += 1;
            s
        };

        let mut batch = WriteBatch::new();
        for doc_id in self.deletes {
            batch.delete_document(doc_id);
        }
        for (document, entries) in self.documents {
            let entries = entries.into_iter().map(|e| (seq(), e)).collect();
            batch.replace_document(document, entries);
        }

        // 문서 기록이 없는 청크는 최소 기록을 함께 만든다
        let mut created: HashSet<String> = HashSet::new();
        for entry in self.orphan_entries {
            let doc_id = entry.chunk.doc_id.clone();
            let known = current.documents.contains_key(&doc_id)
                || batch.documents.iter().any(|d| d.id == doc_id);
            if !known && created.insert(doc_id.clone()) {
                batch.documents.push(StoredDocument {
                    id: doc_id,
                    source_type: entry.source_type,
                    content: String::new(),
                    content_hash: String::new(),
                    metadata: entry.metadata.clone(),
                    indexed_at: Utc::now(),
                });
            }
            batch.entries.push((seq(), entry));
        }
        batch
    }
}

// ============================================================================
// DualIndexStore
// ============================================================================

/// 이중 인덱스 저장소
///
/// 읽기: `snapshot()`으로 얻은 스냅샷은 이후 쓰기와 무관하게 일관됩니다.
/// 쓰기: 한 번에 하나씩 직렬화되며, 영속화가 실패하면 스냅샷은 그대로입니다.
pub struct DualIndexStore {
    current: RwLock<Arc<IndexSnapshot>>,
    store: KnowledgeStore,
    writer: Mutex<()>,
}

impl DualIndexStore {
    /// 저장소를 열고 스냅샷 복원 (재임베딩 없음)
    pub fn open(path: &Path) -> Result<Self> {
        let store = KnowledgeStore::open(path)?;
        let documents = store.list_documents(None)?;
        let entries = store.load_entries()?;
        let snapshot = IndexSnapshot::from_store(documents, entries);

        tracing::info!(
            "Loaded index: {} documents, {} fine / {} coarse chunks",
            snapshot.document_count(),
            snapshot.chunk_count(Granularity::Fine),
            snapshot.chunk_count(Granularity::Coarse)
        );

        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            store,
            writer: Mutex::new(()),
        })
    }

    /// 현재 스냅샷
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// 변경 묶음 커밋: 영속화 후 스냅샷 교체
    pub fn commit(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let _guard = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let base = self.snapshot();
        let batch = changes.into_batch(&base);

        let mut next = IndexSnapshot::clone(&base);
        next.apply(&batch);

        self.store.commit(&batch)?;
        self.swap(next);
        Ok(())
    }

    /// 청크 upsert (같은 청크 ID는 대체)
    pub fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut changes = ChangeSet::new();
        changes.upsert_entries(entries);
        self.commit(changes)
    }

    /// 문서의 모든 청크 제거
    ///
    /// # Returns
    /// 제거된 청크 수
    pub fn delete_by_document(&self, doc_id: &str) -> Result<usize> {
        let removed = self.snapshot().chunks_for_document(doc_id, None).len();
        let mut changes = ChangeSet::new();
        changes.delete_document(doc_id);
        self.commit(changes)?;
        Ok(removed)
    }

    /// 전체 삭제
    pub fn clear(&self) -> Result<()> {
        let _guard = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        self.store.clear()?;
        self.swap(IndexSnapshot::default());
        Ok(())
    }

    pub fn vector_search(
        &self,
        query: &[f32],
        granularity: Granularity,
        k: usize,
    ) -> Vec<(String, f32)> {
        to_pairs(self.snapshot().vector_search(query, granularity, k))
    }

    pub fn lexical_search(
        &self,
        query_terms: &[String],
        granularity: Granularity,
        k: usize,
    ) -> Vec<(String, f32)> {
        to_pairs(self.snapshot().lexical_search(query_terms, granularity, k))
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }

    fn swap(&self, next: IndexSnapshot) {
        let next = Arc::new(next);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

fn to_pairs(results: Vec<ScoredChunk>) -> Vec<(String, f32)> {
    results
        .into_iter()
        .map(|r| (r.chunk.id().to_string(), r.score))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
