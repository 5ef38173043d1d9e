//! Chunk Segmenter
//!
//! 문서를 fine / coarse 두 세분도의 겹치는 청크 집합으로 나눕니다.
//!
//! 경계 우선순위: 문단(빈 줄) > 문장 끝 > 줄바꿈 > 단어 경계 > 강제 절단.
//! 마지막 나머지 청크를 제외한 모든 청크 길이는 `[min, max]` 문자 범위 안에 있으며,
//! 같은 입력은 항상 같은 경계를 만듭니다 (재인덱싱 멱등성).

use crate::error::{RagError, Result};

use super::cleaner::TextCleaner;
use super::document::{Chunk, Document, Granularity};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 세분도 하나의 청킹 설정
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    /// 최소 청크 크기 (문자 수)
    pub min_characters: usize,
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 이전 청크와 겹치는 비율 (청크 길이 대비)
    pub overlap_fraction: f32,
}

impl ChunkConfig {
    /// fine 기본값 (350~700자, 15% 오버랩)
    pub fn fine() -> Self {
        Self {
            min_characters: 350,
            max_characters: 700,
            overlap_fraction: 0.15,
        }
    }

    /// coarse 기본값 (1500~2500자, 15% 오버랩)
    pub fn coarse() -> Self {
        Self {
            min_characters: 1500,
            max_characters: 2500,
            overlap_fraction: 0.15,
        }
    }

    pub fn without_overlap(mut self) -> Self {
        self.overlap_fraction = 0.0;
        self
    }

    fn overlap_for(&self, chunk_len: usize) -> usize {
        let overlap = (chunk_len as f32 * self.overlap_fraction).round() as usize;
        // 진행 보장
        overlap.min(chunk_len.saturating_sub(1))
    }
}

// ============================================================================
// Segmented Document
// ============================================================================

/// `segment` 결과
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedDocument {
    pub doc_id: String,
    /// 정제된 텍스트 (청크 오프셋의 기준)
    pub prepared_text: String,
    pub fine: Vec<Chunk>,
    pub coarse: Vec<Chunk>,
}

impl SegmentedDocument {
    pub fn chunks(&self, granularity: Granularity) -> &[Chunk] {
        match granularity {
            Granularity::Fine => &self.fine,
            Granularity::Coarse => &self.coarse,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fine.is_empty() && self.coarse.is_empty()
    }

    /// 두 세분도를 fine → coarse 순서로 순회
    pub fn all_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.fine.iter().chain(self.coarse.iter())
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// 이중 세분도 청커
#[derive(Debug, Clone)]
pub struct Segmenter {
    fine: ChunkConfig,
    coarse: ChunkConfig,
    cleaner: TextCleaner,
}

impl Segmenter {
    pub fn new(fine: ChunkConfig, coarse: ChunkConfig, cleaner: TextCleaner) -> Self {
        Self {
            fine,
            coarse,
            cleaner,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::fine(), ChunkConfig::coarse(), TextCleaner::default())
    }

    pub fn config(&self, granularity: Granularity) -> &ChunkConfig {
        match granularity {
            Granularity::Fine => &self.fine,
            Granularity::Coarse => &self.coarse,
        }
    }

    /// 문서를 두 세분도로 분할
    ///
    /// 빈 문서는 청크 0개를 반환합니다 (에러 아님).
    /// ID가 없거나 바이너리로 보이는 입력만 `Segmentation` 에러입니다.
    pub fn segment(&self, document: &Document) -> Result<SegmentedDocument> {
        if document.id.trim().is_empty() {
            return Err(RagError::segmentation(&document.id, "document id is empty"));
        }
        if looks_binary(&document.text) {
            return Err(RagError::segmentation(
                &document.id,
                "content does not look like text",
            ));
        }

        let prepared_text = self.cleaner.prepare(&document.text);
        let chars: Vec<char> = prepared_text.chars().collect();

        let build = |granularity: Granularity| -> Vec<Chunk> {
            split_spans(&chars, self.config(granularity))
                .into_iter()
                .map(|(start, end)| Chunk {
                    id: Chunk::make_id(&document.id, granularity, start),
                    doc_id: document.id.clone(),
                    granularity,
                    text: chars[start..end].iter().collect(),
                    start,
                    end,
                })
                .collect()
        };

        let fine = build(Granularity::Fine);
        let coarse = build(Granularity::Coarse);

        tracing::debug!(
            "Segmented {}: {} chars -> {} fine, {} coarse",
            document.id,
            chars.len(),
            fine.len(),
            coarse.len()
        );

        Ok(SegmentedDocument {
            doc_id: document.id.clone(),
            prepared_text,
            fine,
            coarse,
        })
    }
}

// ============================================================================
// Span Splitting
// ============================================================================

/// 경계 종류 (값이 클수록 선호)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word = 0,
    Line = 1,
    Sentence = 2,
    Paragraph = 3,
}

/// 문자 배열을 `(start, end)` 구간으로 분할
fn split_spans(chars: &[char], config: &ChunkConfig) -> Vec<(usize, usize)> {
    let Some(first) = chars.iter().position(|c| !c.is_whitespace()) else {
        return vec![];
    };
    let n = chars
        .iter()
        .rposition(|c| !c.is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(chars.len());

    let min = config.min_characters.max(1);
    let max = config.max_characters.max(min);

    let mut spans = Vec::new();
    let mut start = first;

    loop {
        if n - start <= max {
            spans.push((start, n));
            break;
        }

        let end = find_break(chars, start + min, start + max);
        spans.push((start, end));

        let overlap = config.overlap_for(end - start);
        start = if overlap == 0 {
            end
        } else {
            snap_to_word_start(chars, end - overlap, end)
        };
    }

    spans
}

/// `[lo, hi]` 안에서 가장 선호도가 높은 경계 중 가장 뒤의 위치
fn find_break(chars: &[char], lo: usize, hi: usize) -> usize {
    let mut best: Option<(Boundary, usize)> = None;

    for p in (lo..=hi).rev() {
        let Some(kind) = boundary_at(chars, p) else {
            continue;
        };
        if best.map_or(true, |(b, _)| kind > b) {
            best = Some((kind, p));
        }
        if kind == Boundary::Paragraph {
            break;
        }
    }

    best.map(|(_, p)| p).unwrap_or(hi)
}

/// `p`가 새 청크의 시작 위치로 적합한지 분류
fn boundary_at(chars: &[char], p: usize) -> Option<Boundary> {
    if p == 0 || p >= chars.len() {
        return None;
    }
    let prev = chars[p - 1];
    if !prev.is_whitespace() || chars[p].is_whitespace() {
        return None;
    }

    let before = if p >= 2 { Some(chars[p - 2]) } else { None };
    if prev == '\n' && before == Some('\n') {
        return Some(Boundary::Paragraph);
    }
    if let Some(c) = before {
        let terminated = is_sentence_end(c)
            || (is_closer(c) && p >= 3 && is_sentence_end(chars[p - 3]));
        if terminated {
            return Some(Boundary::Sentence);
        }
    }
    if prev == '\n' {
        return Some(Boundary::Line);
    }
    Some(Boundary::Word)
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’')
}

/// 오버랩 시작점을 단어 시작으로 앞당김 (없으면 그대로)
fn snap_to_word_start(chars: &[char], from: usize, end: usize) -> usize {
    (from..end)
        .find(|&q| q > 0 && chars[q - 1].is_whitespace() && !chars[q].is_whitespace())
        .unwrap_or(from)
}

/// NUL 바이트가 있거나 제어 문자가 10%를 넘으면 텍스트가 아닌 것으로 판단
fn looks_binary(text: &str) -> bool {
    if text.contains('\0') {
        return true;
    }
    let mut total = 0usize;
    let mut control = 0usize;
    for c in text.chars() {
        total += 1;
        if c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c') {
            control += 1;
        }
    }
    total > 0 && control * 10 > total
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::document::SourceType;

    fn plain_segmenter(fine: ChunkConfig, coarse: ChunkConfig) -> Segmenter {
        Segmenter::new(fine, coarse, TextCleaner::new(false))
    }

    fn sample_text(target_chars: usize) -> String {
        let sentence = "The quarterly report covers revenue, hiring plans, and the remote work pilot. ";
        let mut text = String::new();
        while text.chars().count() < target_chars {
            text.push_str(sentence);
        }
        text.chars().take(target_chars).collect()
    }

    #[test]
    fn test_segment_empty_document() {
        let segmenter = Segmenter::with_defaults();
        let doc = Document::new("empty", SourceType::Email, "");
        let segmented = segmenter.segment(&doc).unwrap();
        assert!(segmented.is_empty());

        let doc = Document::new("blank", SourceType::Pdf, "   \n\n  ");
        assert!(segmenter.segment(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_segment_rejects_missing_id_and_binary() {
        let segmenter = Segmenter::with_defaults();
        let doc = Document::new("", SourceType::Email, "hello");
        assert!(matches!(
            segmenter.segment(&doc),
            Err(RagError::Segmentation { .. })
        ));

        let doc = Document::new("bin", SourceType::Pdf, "abc\0def");
        assert!(matches!(
            segmenter.segment(&doc),
            Err(RagError::Segmentation { .. })
        ));
    }

    #[test]
    fn test_2000_chars_fine_covers_without_gaps() {
        let segmenter = plain_segmenter(
            ChunkConfig::fine().without_overlap(),
            ChunkConfig::coarse().without_overlap(),
        );
        let text = sample_text(2000);
        let n = text.trim_end().chars().count();
        let doc = Document::new("doc-2000", SourceType::Pdf, text);

        let segmented = segmenter.segment(&doc).unwrap();
        let fine = &segmented.fine;

        assert!(fine.len() >= 3, "got {} fine chunks", fine.len());
        assert_eq!(fine[0].start, 0);
        assert_eq!(fine.last().unwrap().end, n);
        for pair in fine.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap between chunks");
        }
        for chunk in &fine[..fine.len() - 1] {
            assert!((350..=700).contains(&chunk.char_len()));
        }
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let segmenter = plain_segmenter(
            ChunkConfig::fine().without_overlap(),
            ChunkConfig::coarse().without_overlap(),
        );
        let doc = Document::new("s", SourceType::Email, sample_text(1800));
        let segmented = segmenter.segment(&doc).unwrap();

        for chunk in &segmented.fine[..segmented.fine.len() - 1] {
            assert!(
                chunk.text.trim_end().ends_with('.'),
                "chunk should end at a sentence: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let segmenter = plain_segmenter(
            ChunkConfig::fine().without_overlap(),
            ChunkConfig::coarse().without_overlap(),
        );
        let doc = Document::new("a", SourceType::Pdf, "a".repeat(2000));
        let segmented = segmenter.segment(&doc).unwrap();

        let lens: Vec<usize> = segmented.fine.iter().map(|c| c.char_len()).collect();
        assert_eq!(lens, vec![700, 700, 600]);
        assert_eq!(segmented.coarse.len(), 1);
    }

    #[test]
    fn test_overlap_shares_context() {
        let segmenter = plain_segmenter(ChunkConfig::fine(), ChunkConfig::coarse());
        let doc = Document::new("o", SourceType::Email, sample_text(3000));
        let segmented = segmenter.segment(&doc).unwrap();

        assert!(segmented.fine.len() >= 4);
        for pair in segmented.fine.windows(2) {
            assert!(pair[1].start < pair[0].end, "expected overlap");
            assert!(pair[1].start > pair[0].start);
        }
        for chunk in &segmented.fine[..segmented.fine.len() - 1] {
            assert!((350..=700).contains(&chunk.char_len()));
        }
    }

    #[test]
    fn test_segment_is_deterministic() {
        let segmenter = Segmenter::with_defaults();
        let doc = Document::email("m1", "Plan", "a@b.c", "2024-01-01", &sample_text(5000));
        let first = segmenter.segment(&doc).unwrap();
        let second = segmenter.segment(&doc).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_chunk_text_matches_offsets() {
        let segmenter = plain_segmenter(ChunkConfig::fine(), ChunkConfig::coarse());
        let text = "원격 근무는 주 3일까지 허용됩니다. ".repeat(80);
        let doc = Document::new("ko", SourceType::Email, text);
        let segmented = segmenter.segment(&doc).unwrap();
        let chars: Vec<char> = segmented.prepared_text.chars().collect();

        for chunk in segmented.all_chunks() {
            let expected: String = chars[chunk.start..chunk.end].iter().collect();
            assert_eq!(chunk.text, expected);
            assert_eq!(chunk.id, Chunk::make_id("ko", chunk.granularity, chunk.start));
        }
    }

    #[test]
    fn test_short_document_single_remainder_chunk() {
        let segmenter = Segmenter::with_defaults();
        let doc = Document::new("short", SourceType::Email, "Lunch at noon?");
        let segmented = segmenter.segment(&doc).unwrap();
        assert_eq!(segmented.fine.len(), 1);
        assert_eq!(segmented.coarse.len(), 1);
        assert_eq!(segmented.fine[0].text, "Lunch at noon?");
    }
}
