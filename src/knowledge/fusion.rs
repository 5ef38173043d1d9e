//! Evidence Fusion & Citation Mapper
//!
//! 두 엔진의 점수를 엔진별로 min-max 정규화한 뒤 가중합으로 융합합니다.
//!
//! ```text
//! fused = alpha * vector + (1 - alpha) * lexical   (없는 쪽은 0)
//! ```
//!
//! 가중치가 0인 엔진에서만 나온 후보는 융합 전에 버립니다 (alpha = 0 또는 1).
//!
//! 같은 문서에서 구간이 임계값 이상 겹치는 청크는 점수가 가장 높은 것 하나만 남기고,
//! 살아남은 청크에 1부터 인용 번호를 붙입니다.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::document::{span_overlap_ratio, DocumentMetadata, Granularity, SourceType};
use super::index::{ScoredChunk, StoredChunk};
use super::router::Selection;

/// 인용 스니펫 최대 길이 (문자, 말줄임표 포함)
const MAX_SNIPPET_CHARS: usize = 500;

// ============================================================================
// Types
// ============================================================================

/// 검색 엔진 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Vector,
    Lexical,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Engine::Vector => "vector",
            Engine::Lexical => "lexical",
        })
    }
}

/// 인용 가능한 근거 한 건
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    /// 1부터 시작하는 인용 번호 (`[1]`, `[2]`, ...)
    pub citation: usize,
    pub chunk_id: String,
    pub doc_id: String,
    pub granularity: Granularity,
    pub text: String,
    /// 융합 점수 (0.0 ~ 1.0)
    pub score: f32,
    /// 정규화된 벡터 점수 (후보에 없었으면 None)
    pub vector_score: Option<f32>,
    /// 정규화된 어휘 점수 (후보에 없었으면 None)
    pub lexical_score: Option<f32>,
    pub start: usize,
    pub end: usize,
    pub source_type: SourceType,
    pub metadata: DocumentMetadata,
}

impl EvidenceItem {
    pub fn title(&self) -> String {
        self.metadata.display_title(&self.doc_id)
    }
}

/// 생성 단계에 넘기는 근거 (LLM 프롬프트용)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub id: usize,
    pub text: String,
    pub source: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub score: f32,
}

/// 쿼리 하나의 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub items: Vec<EvidenceItem>,
    pub selection: Selection,
    pub route_confidence: f32,
    /// 엔진 하나 이상이 타임아웃/실패해 일부 결과만 반환됨
    pub degraded: bool,
    pub timed_out_engines: Vec<Engine>,
    pub latency_ms: f64,
}

impl RetrievalResult {
    pub fn empty(selection: Selection) -> Self {
        Self {
            items: vec![],
            selection,
            route_confidence: 1.0,
            degraded: false,
            timed_out_engines: vec![],
            latency_ms: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 생성 단계용 근거 목록
    ///
    /// 항목별로 500자(잘린 경우 `...` 포함)에서 자르고,
    /// 누적 길이가 `max_context_chars`를 넘기 직전에 멈춥니다.
    pub fn to_evidence(&self, max_context_chars: usize) -> Vec<Evidence> {
        let mut evidence = Vec::new();
        let mut used = 0;

        for item in &self.items {
            let text = truncate_chars(&item.text, MAX_SNIPPET_CHARS);
            let len = text.chars().count();
            if used + len > max_context_chars {
                break;
            }
            used += len;

            evidence.push(Evidence {
                id: item.citation,
                text,
                source: item.title(),
                source_type: item.source_type,
                score: (item.score * 1000.0).round() / 1000.0,
            });
        }

        evidence
    }
}

const ELLIPSIS: &str = "...";

/// `max`자 이하로 자름. 잘렸으면 말줄임표까지 `max`자
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let cut = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(idx, _)| idx);
    format!("{}{}", &text[..cut], ELLIPSIS)
}

// ============================================================================
// Normalization
// ============================================================================

/// 후보 목록 점수를 [0, 1]로 min-max 정규화
///
/// 모든 점수가 같으면 전부 1.0입니다.
pub fn min_max_normalize(candidates: &[ScoredChunk]) -> Vec<f32> {
    let Some(first) = candidates.first() else {
        return vec![];
    };

    let (min, max) = candidates
        .iter()
        .fold((first.score, first.score), |(lo, hi), c| {
            (lo.min(c.score), hi.max(c.score))
        });
    let range = max - min;

    candidates
        .iter()
        .map(|c| {
            if range <= f32::EPSILON {
                1.0
            } else {
                ((c.score - min) / range).clamp(0.0, 1.0)
            }
        })
        .collect()
}

// ============================================================================
// Fusion
// ============================================================================

struct Candidate {
    chunk: Arc<StoredChunk>,
    vector: Option<f32>,
    lexical: Option<f32>,
    fused: f32,
}

/// 두 후보 목록 융합
///
/// # Arguments
/// * `alpha` - 벡터 점수 가중치 ([0, 1]로 클램프)
/// * `dedup_threshold` - 같은 문서 구간 겹침 비율이 이 값을 넘으면 중복
/// * `k` - 최대 결과 수
pub fn fuse(
    vector: &[ScoredChunk],
    lexical: &[ScoredChunk],
    alpha: f32,
    dedup_threshold: f32,
    k: usize,
) -> Vec<EvidenceItem> {
    let alpha = if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        0.5
    };

    let mut merged: HashMap<&str, Candidate> = HashMap::new();

    for (c, score) in vector.iter().zip(min_max_normalize(vector)) {
        merged
            .entry(c.chunk.id())
            .or_insert_with(|| Candidate::new(&c.chunk))
            .vector = Some(score);
    }
    for (c, score) in lexical.iter().zip(min_max_normalize(lexical)) {
        merged
            .entry(c.chunk.id())
            .or_insert_with(|| Candidate::new(&c.chunk))
            .lexical = Some(score);
    }

    let mut ranked: Vec<Candidate> = merged
        .into_values()
        .filter(|c| (alpha > 0.0 && c.vector.is_some()) || (alpha < 1.0 && c.lexical.is_some()))
        .map(|mut c| {
            c.fused = alpha * c.vector.unwrap_or(0.0) + (1.0 - alpha) * c.lexical.unwrap_or(0.0);
            c
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id().cmp(b.chunk.id()))
    });

    let mut kept: Vec<Candidate> = Vec::with_capacity(k);
    for candidate in ranked {
        if kept.len() >= k {
            break;
        }
        if kept.iter().any(|prev| is_duplicate(prev, &candidate, dedup_threshold)) {
            continue;
        }
        kept.push(candidate);
    }

    kept.into_iter()
        .enumerate()
        .map(|(i, c)| c.into_item(i + 1))
        .collect()
}

/// 같은 문서의 겹치는 구간인지
fn is_duplicate(kept: &Candidate, candidate: &Candidate, threshold: f32) -> bool {
    let a = &kept.chunk.entry.chunk;
    let b = &candidate.chunk.entry.chunk;
    a.doc_id == b.doc_id && span_overlap_ratio((a.start, a.end), (b.start, b.end)) > threshold
}

impl Candidate {
    fn new(chunk: &Arc<StoredChunk>) -> Self {
        Self {
            chunk: Arc::clone(chunk),
            vector: None,
            lexical: None,
            fused: 0.0,
        }
    }

    fn into_item(self, citation: usize) -> EvidenceItem {
        let entry = &self.chunk.entry;
        EvidenceItem {
            citation,
            chunk_id: entry.chunk.id.clone(),
            doc_id: entry.chunk.doc_id.clone(),
            granularity: entry.chunk.granularity,
            text: entry.chunk.text.clone(),
            score: self.fused.clamp(0.0, 1.0),
            vector_score: self.vector,
            lexical_score: self.lexical,
            start: entry.chunk.start,
            end: entry.chunk.end,
            source_type: entry.source_type,
            metadata: entry.metadata.clone(),
        }
    }
}

/// 저장된 청크를 점수 1.0 근거 목록으로 (문서별 조회용)
pub fn cite_chunks(chunks: &[Arc<StoredChunk>], k: usize) -> Vec<EvidenceItem> {
    chunks
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, chunk)| {
            let mut candidate = Candidate::new(chunk);
            candidate.fused = 1.0;
            candidate.into_item(i + 1)
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
