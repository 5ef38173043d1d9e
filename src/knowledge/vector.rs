//! Vector Indexer - 정확한 코사인 유사도 검색
//!
//! 청크 임베딩을 삽입 순서대로 보관하고 전수 스캔(exact)으로 top-k를 구합니다.
//! 수만 개 규모에서는 ANN 없이도 지연 예산 안에 들어옵니다.

use std::cmp::Ordering;
use std::time::Instant;

/// 마감 시각 확인 간격 (엔트리 수)
const DEADLINE_CHECK_INTERVAL: usize = 1024;

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 0 벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// L2 정규화 (0 벡터는 그대로)
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// 점수 내림차순, 동점은 seq 오름차순(먼저 삽입된 것 우선)
fn rank_order(a: &(u64, f32), b: &(u64, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// `(seq, score)` 목록에서 상위 k개를 정렬해 반환
pub fn top_k_by_score(mut scored: Vec<(u64, f32)>, k: usize) -> Vec<(u64, f32)> {
    if k == 0 {
        return vec![];
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_by(rank_order);
    scored
}

/// 전수 스캔 벡터 검색
///
/// `entries`는 `(seq, embedding)` 쌍입니다.
/// 쿼리와 차원이 다른 임베딩은 점수를 매기지 않고 건너뜁니다.
pub fn exact_search<'a>(
    entries: impl Iterator<Item = (u64, &'a [f32])>,
    query: &[f32],
    k: usize,
) -> Vec<(u64, f32)> {
    let scored = entries
        .filter(|(_, embedding)| embedding.len() == query.len())
        .map(|(seq, embedding)| (seq, cosine_similarity(query, embedding)))
        .collect();
    top_k_by_score(scored, k)
}

/// 마감 시각이 있는 전수 스캔
///
/// 스캔 도중 `deadline`을 넘기면 중단하고 None을 반환합니다.
pub fn exact_search_until<'a>(
    entries: impl Iterator<Item = (u64, &'a [f32])>,
    query: &[f32],
    k: usize,
    deadline: Instant,
) -> Option<Vec<(u64, f32)>> {
    let mut scored = Vec::new();
    for (i, (seq, embedding)) in entries.enumerate() {
        if i % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            return None;
        }
        if embedding.len() == query.len() {
            scored.push((seq, cosine_similarity(query, embedding)));
        }
    }
    Some(top_k_by_score(scored, k))
}

// ============================================================================
// Tests
// ============================================================================
