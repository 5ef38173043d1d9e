//! Lexical Indexer - BM25 역색인
//!
//! 세분도마다 하나의 포스팅 집합(term → {chunk, tf})을 유지합니다.
//! 포스팅 리스트는 `Arc`로 공유되어, 스냅샷 복제 시 변경된 term만 복사됩니다.
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::vector::top_k_by_score;

/// BM25 term frequency 포화 파라미터
const BM25_K1: f32 = 1.2;
/// BM25 길이 정규화 파라미터
const BM25_B: f32 = 0.75;

/// 인덱싱/쿼리 양쪽에서 제외하는 불용어
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "up", "about", "into", "through", "during", "before", "after", "above", "below",
    "between", "among", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "our",
    "we", "you", "it", "this", "that", "me", "my",
];

// ============================================================================
// Tokenizer
// ============================================================================

/// 텍스트를 소문자 토큰으로 분리 (2자 미만, 불용어 제외)
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// 청크 하나의 term 빈도와 길이
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermStats {
    /// term 이름순 정렬 (결정성)
    pub terms: Vec<(String, u32)>,
    /// 토큰 수
    pub length: u32,
}

impl TermStats {
    pub fn from_text(text: &str) -> Self {
        let tokens = tokenize(text);
        let length = tokens.len() as u32;
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }
        Self {
            terms: counts.into_iter().collect(),
            length,
        }
    }
}

// ============================================================================
// LexicalIndex
// ============================================================================

/// 포스팅 엔트리
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// 청크 삽입 순번 (스냅샷 내 청크 키)
    pub seq: u64,
    pub term_frequency: u32,
    pub chunk_length: u32,
}

/// 한 세분도의 BM25 인덱스
#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    postings: HashMap<String, Arc<Vec<Posting>>>,
    chunk_count: usize,
    total_length: u64,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seq: u64, stats: &TermStats) {
        for (term, tf) in &stats.terms {
            let list = self.postings.entry(term.clone()).or_default();
            Arc::make_mut(list).push(Posting {
                seq,
                term_frequency: *tf,
                chunk_length: stats.length,
            });
        }
        self.chunk_count += 1;
        self.total_length += stats.length as u64;
    }

    pub fn remove(&mut self, seq: u64, stats: &TermStats) {
        for (term, _) in &stats.terms {
            let now_empty = match self.postings.get_mut(term) {
                Some(list) => {
                    Arc::make_mut(list).retain(|p| p.seq != seq);
                    list.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.postings.remove(term);
            }
        }
        self.chunk_count = self.chunk_count.saturating_sub(1);
        self.total_length = self.total_length.saturating_sub(stats.length as u64);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    /// term이 등장하는 청크 수
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map(|p| p.len()).unwrap_or(0)
    }

    /// BM25 검색
    ///
    /// # Returns
    /// `(seq, score)` 목록, 점수 내림차순 (동점은 먼저 삽입된 청크 우선)
    pub fn search(&self, query_terms: &[String], k: usize) -> Vec<(u64, f32)> {
        if self.chunk_count == 0 || k == 0 {
            return vec![];
        }

        let n = self.chunk_count as f32;
        let avg_len = (self.total_length as f32 / n).max(1.0);
        let mut seen = HashSet::new();
        let mut scores: HashMap<u64, f32> = HashMap::new();

        for term in query_terms {
            if !seen.insert(term.as_str()) {
                continue;
            }
            let Some(postings) = self.postings.get(term) else {
                continue;
            };

            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings.iter() {
                let tf = posting.term_frequency as f32;
                let norm = 1.0 - BM25_B + BM25_B * posting.chunk_length as f32 / avg_len;
                let score = idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm);
                *scores.entry(posting.seq).or_insert(0.0) += score;
            }
        }

        top_k_by_score(scores.into_iter().collect(), k)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(q: &str) -> Vec<String> {
        tokenize(q)
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The Remote-work policy: 3 days/week!"),
            vec!["remote", "work", "policy", "days", "week"]
        );
        assert!(tokenize("").is_empty());
        assert_eq!(tokenize("원격 근무"), vec!["원격", "근무"]);
    }

    #[test]
    fn test_term_stats() {
        let stats = TermStats::from_text("budget budget review");
        assert_eq!(stats.length, 3);
        assert_eq!(
            stats.terms,
            vec![("budget".to_string(), 2), ("review".to_string(), 1)]
        );
    }

    #[test]
    fn test_bm25_ranks_matching_chunks() {
        let mut index = LexicalIndex::new();
        index.insert(1, &TermStats::from_text("remote work permitted 3 days/week"));
        index.insert(2, &TermStats::from_text("quarterly budget review meeting"));
        index.insert(3, &TermStats::from_text("office work hours and parking"));

        let results = index.search(&terms("remote work policy"), 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 3);
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn test_idf_favours_rare_terms() {
        let mut index = LexicalIndex::new();
        index.insert(1, &TermStats::from_text("invoice invoice"));
        index.insert(2, &TermStats::from_text("invoice contract"));
        index.insert(3, &TermStats::from_text("invoice summary"));

        assert_eq!(index.document_frequency("invoice"), 3);
        let results = index.search(&terms("contract invoice"), 1);
        assert_eq!(results, vec![(2, results[0].1)]);
    }

    #[test]
    fn test_remove_clears_postings() {
        let mut index = LexicalIndex::new();
        let stats = TermStats::from_text("alpha beta");
        index.insert(7, &stats);
        index.insert(8, &TermStats::from_text("beta gamma"));
        assert_eq!(index.vocabulary_size(), 3);

        index.remove(7, &stats);
        assert_eq!(index.chunk_count(), 1);
        assert_eq!(index.vocabulary_size(), 2);
        assert!(index.search(&terms("alpha"), 5).is_empty());
        assert_eq!(index.search(&terms("beta"), 5)[0].0, 8);
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let mut index = LexicalIndex::new();
        index.insert(1, &TermStats::from_text("shared term"));
        let snapshot = index.clone();

        index.insert(2, &TermStats::from_text("shared other"));
        assert_eq!(snapshot.document_frequency("shared"), 1);
        assert_eq!(index.document_frequency("shared"), 2);
    }

    #[test]
    fn test_empty_index_and_query() {
        let index = LexicalIndex::new();
        assert!(index.search(&terms("anything"), 5).is_empty());

        let mut index = LexicalIndex::new();
        index.insert(1, &TermStats::from_text("text"));
        assert!(index.search(&[], 5).is_empty());
    }
}
