//! Knowledge Store - rusqlite 기반 영속 저장소
//!
//! 인덱스의 원본 기록입니다. 검색은 메모리 스냅샷에서 수행하고,
//! 이 저장소는 열 때 스냅샷을 복원하는 데만 쓰입니다.
//!
//! - documents: 정제된 본문 + content hash (재인덱싱 판단, 재임베딩 원본)
//! - chunks: 청크 텍스트/오프셋 + 임베딩 (little-endian f32 BLOB)
//! - meta: 임베딩 모델 식별자, 차원

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::document::{Chunk, DocumentMetadata, Granularity, IndexEntry, SourceType};

const META_MODEL_ID: &str = "embedding_model";
const META_DIMENSION: &str = "embedding_dimension";

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub source_type: SourceType,
    /// 정제된 텍스트 (청크 오프셋 기준, 재인덱싱 원본)
    pub content: String,
    pub content_hash: String,
    pub metadata: DocumentMetadata,
    pub indexed_at: DateTime<Utc>,
}

/// 임베딩 모델 식별 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    pub model_id: String,
    pub dimension: usize,
}

/// 저장소에서 읽은 청크 (삽입 순번 포함)
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub seq: u64,
    pub entry: IndexEntry,
}

/// 한 번의 트랜잭션으로 반영되는 변경 묶음
///
/// 삭제가 먼저 적용된 뒤 삽입이 적용됩니다.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub deleted_docs: Vec<String>,
    pub documents: Vec<StoredDocument>,
    pub entries: Vec<(u64, IndexEntry)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 문서의 기존 청크를 모두 지우고 새 청크로 대체
    pub fn replace_document(&mut self, document: StoredDocument, entries: Vec<(u64, IndexEntry)>) {
        self.deleted_docs.push(document.id.clone());
        self.documents.push(document);
        self.entries.extend(entries);
    }

    pub fn delete_document(&mut self, doc_id: impl Into<String>) {
        self.deleted_docs.push(doc_id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_docs.is_empty() && self.documents.is_empty() && self.entries.is_empty()
    }
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// SQLite 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                metadata TEXT NOT NULL,
                indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                granularity TEXT NOT NULL,
                seq INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id);
            CREATE INDEX IF NOT EXISTS idx_documents_indexed_at ON documents(indexed_at);
            "#,
        )
        .context("Failed to create schema")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Meta
    // ------------------------------------------------------------------------

    fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
        conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
        .context("Failed to read meta")
    }

    /// 인덱스를 만든 임베딩 모델 (기록이 없으면 None)
    pub fn model_identity(&self) -> Result<Option<ModelIdentity>> {
        let conn = self.lock()?;
        let model_id = Self::get_meta(&conn, META_MODEL_ID)?;
        let dimension = Self::get_meta(&conn, META_DIMENSION)?;

        Ok(match (model_id, dimension) {
            (Some(model_id), Some(dimension)) => Some(ModelIdentity {
                model_id,
                dimension: dimension
                    .parse()
                    .with_context(|| format!("Invalid stored dimension: {dimension}"))?,
            }),
            _ => None,
        })
    }

    pub fn set_model_identity(&self, identity: &ModelIdentity) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![META_MODEL_ID, identity.model_id],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![META_DIMENSION, identity.dimension.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------------

    /// 변경 묶음을 하나의 트랜잭션으로 반영
    pub fn commit(&self, batch: &WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        {
            let mut delete_chunks = tx.prepare_cached("DELETE FROM chunks WHERE doc_id = ?1")?;
            let mut delete_doc = tx.prepare_cached("DELETE FROM documents WHERE id = ?1")?;
            for doc_id in &batch.deleted_docs {
                delete_chunks.execute(params![doc_id])?;
                delete_doc.execute(params![doc_id])?;
            }

            let mut insert_doc = tx.prepare_cached(
                "INSERT OR REPLACE INTO documents
                 (id, source_type, content, content_hash, metadata, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for doc in &batch.documents {
                insert_doc.execute(params![
                    doc.id,
                    doc.source_type.as_str(),
                    doc.content,
                    doc.content_hash,
                    serde_json::to_string(&doc.metadata)?,
                    doc.indexed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ])?;
            }

            let mut insert_chunk = tx.prepare_cached(
                "INSERT OR REPLACE INTO chunks
                 (id, doc_id, granularity, seq, start_offset, end_offset, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (seq, entry) in &batch.entries {
                let chunk = &entry.chunk;
                insert_chunk.execute(params![
                    chunk.id,
                    chunk.doc_id,
                    chunk.granularity.as_str(),
                    *seq as i64,
                    chunk.start as i64,
                    chunk.end as i64,
                    chunk.text,
                    encode_embedding(&entry.embedding),
                ])?;
            }
        }

        tx.commit().context("Failed to commit index batch")?;

        tracing::debug!(
            "Committed batch: {} deleted, {} documents, {} chunks",
            batch.deleted_docs.len(),
            batch.documents.len(),
            batch.entries.len()
        );
        Ok(())
    }

    /// 모든 문서/청크 삭제 (모델 정보는 유지)
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM chunks; DELETE FROM documents;")
            .context("Failed to clear index")?;
        tracing::info!("Cleared knowledge store at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------------

    /// 문서 하나 조회
    pub fn get_document(&self, id: &str) -> Result<Option<StoredDocument>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_type, content, content_hash, metadata, indexed_at
             FROM documents WHERE id = ?1",
        )?;
        let row = stmt.query_row(params![id], read_document_row).optional()?;
        row.map(StoredDocument::try_from).transpose()
    }

    /// 문서 목록 (최근 인덱싱 순)
    pub fn list_documents(&self, limit: Option<usize>) -> Result<Vec<StoredDocument>> {
        let conn = self.lock()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut stmt = conn.prepare(
            "SELECT id, source_type, content, content_hash, metadata, indexed_at
             FROM documents
             ORDER BY indexed_at DESC, id ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], read_document_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(StoredDocument::try_from).collect()
    }

    /// 스냅샷 복원용: 모든 청크를 삽입 순서대로
    pub fn load_entries(&self) -> Result<Vec<StoredEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.doc_id, c.granularity, c.seq, c.start_offset, c.end_offset,
                    c.text, c.embedding, d.source_type, d.metadata
             FROM chunks c
             JOIN documents d ON d.id = c.doc_id
             ORDER BY c.seq ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ChunkRow {
                    id: row.get(0)?,
                    doc_id: row.get(1)?,
                    granularity: row.get(2)?,
                    seq: row.get(3)?,
                    start: row.get(4)?,
                    end: row.get(5)?,
                    text: row.get(6)?,
                    embedding: row.get(7)?,
                    source_type: row.get(8)?,
                    metadata: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(granularity) = Granularity::parse(&row.granularity) else {
                tracing::warn!("Skipping chunk {} with unknown granularity", row.id);
                continue;
            };
            let Some(source_type) = SourceType::parse(&row.source_type) else {
                tracing::warn!("Skipping chunk {} with unknown source type", row.id);
                continue;
            };

            entries.push(StoredEntry {
                seq: row.seq as u64,
                entry: IndexEntry {
                    chunk: Chunk {
                        id: row.id,
                        doc_id: row.doc_id,
                        granularity,
                        text: row.text,
                        start: row.start as usize,
                        end: row.end as usize,
                    },
                    embedding: decode_embedding(&row.embedding),
                    source_type,
                    metadata: serde_json::from_str(&row.metadata).unwrap_or_default(),
                },
            });
        }

        Ok(entries)
    }

    /// 문서 수 / 청크 수
    pub fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.lock()?;
        let docs: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok((docs as usize, chunks as usize))
    }
}

// ============================================================================
// Row Helpers
// ============================================================================

struct ChunkRow {
    id: String,
    doc_id: String,
    granularity: String,
    seq: i64,
    start: i64,
    end: i64,
    text: String,
    embedding: Vec<u8>,
    source_type: String,
    metadata: String,
}

type DocumentRow = (String, String, String, String, String, String);

fn read_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

impl TryFrom<DocumentRow> for StoredDocument {
    type Error = anyhow::Error;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let (id, source_type, content, content_hash, metadata, indexed_at) = row;
        let source_type = SourceType::parse(&source_type)
            .with_context(|| format!("Unknown source type '{source_type}' for {id}"))?;

        Ok(Self {
            id,
            source_type,
            content,
            content_hash,
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            indexed_at: parse_datetime(&indexed_at),
        })
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Encoding
// ============================================================================

/// 문서 원문의 SHA-256 (hex)
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, KnowledgeStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = KnowledgeStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn stored_doc(id: &str, content: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            source_type: SourceType::Email,
            content: content.to_string(),
            content_hash: content_hash(content),
            metadata: DocumentMetadata {
                title: Some(format!("Title {id}")),
                ..Default::default()
            },
            indexed_at: Utc::now(),
        }
    }

    fn entry(doc_id: &str, granularity: Granularity, start: usize, text: &str) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: Chunk::make_id(doc_id, granularity, start),
                doc_id: doc_id.to_string(),
                granularity,
                text: text.to_string(),
                start,
                end: start + text.chars().count(),
            },
            embedding: vec![0.25, -1.5, 3.0],
            source_type: SourceType::Email,
            metadata: DocumentMetadata::default(),
        }
    }

    #[test]
    fn test_commit_and_load_entries() {
        let (_dir, store) = create_test_store();

        let mut batch = WriteBatch::new();
        batch.replace_document(
            stored_doc("msg-1", "hello world"),
            vec![
                (1, entry("msg-1", Granularity::Fine, 0, "hello")),
                (2, entry("msg-1", Granularity::Coarse, 0, "hello world")),
            ],
        );
        store.commit(&batch).unwrap();

        let entries = store.load_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[0].entry.chunk.granularity, Granularity::Fine);
        assert_eq!(entries[1].entry.embedding, vec![0.25, -1.5, 3.0]);
        // 메타데이터는 문서 기록에서 채워짐
        assert_eq!(
            entries[0].entry.metadata.title.as_deref(),
            Some("Title msg-1")
        );
        assert_eq!(store.counts().unwrap(), (1, 2));
    }

    #[test]
    fn test_replace_document_drops_old_chunks() {
        let (_dir, store) = create_test_store();

        let mut batch = WriteBatch::new();
        batch.replace_document(
            stored_doc("msg-1", "v1"),
            vec![(1, entry("msg-1", Granularity::Fine, 0, "old text"))],
        );
        store.commit(&batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.replace_document(
            stored_doc("msg-1", "v2"),
            vec![(2, entry("msg-1", Granularity::Fine, 5, "new text"))],
        );
        store.commit(&batch).unwrap();

        let entries = store.load_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry.chunk.text, "new text");
        assert_eq!(
            store.get_document("msg-1").unwrap().unwrap().content_hash,
            content_hash("v2")
        );
    }

    #[test]
    fn test_delete_and_clear() {
        let (_dir, store) = create_test_store();

        let mut batch = WriteBatch::new();
        for id in ["a", "b"] {
            batch.replace_document(
                stored_doc(id, id),
                vec![(0, entry(id, Granularity::Fine, 0, id))],
            );
        }
        store.commit(&batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete_document("a");
        store.commit(&batch).unwrap();
        assert!(store.get_document("a").unwrap().is_none());
        assert_eq!(store.counts().unwrap(), (1, 1));

        store.clear().unwrap();
        assert_eq!(store.counts().unwrap(), (0, 0));
    }

    #[test]
    fn test_model_identity() {
        let (_dir, store) = create_test_store();
        assert!(store.model_identity().unwrap().is_none());

        let identity = ModelIdentity {
            model_id: "hash-fnv1a".to_string(),
            dimension: 384,
        };
        store.set_model_identity(&identity).unwrap();
        assert_eq!(store.model_identity().unwrap(), Some(identity));
    }

    #[test]
    fn test_list_documents_limit() {
        let (_dir, store) = create_test_store();
        let mut batch = WriteBatch::new();
        for i in 0..5 {
            let mut doc = stored_doc(&format!("doc{i}"), "x");
            doc.indexed_at = Utc::now() + chrono::Duration::seconds(i);
            batch.replace_document(doc, vec![]);
        }
        store.commit(&batch).unwrap();

        let docs = store.list_documents(Some(2)).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "doc4");
        assert_eq!(store.list_documents(None).unwrap().len(), 5);
    }

    #[test]
    fn test_content_hash_and_embedding_codec() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);

        let v = vec![1.0f32, -0.5, f32::MIN_POSITIVE];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }
}
