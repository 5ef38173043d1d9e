//! 문서·청크 데이터 모델
//!
//! 문서(이메일/PDF)는 외부 수집기가 소유하며, 코어는 청크를 재구성하는 데 필요한
//! 텍스트만 보관합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Source Type
// ============================================================================

/// 문서 출처 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Email,
    Pdf,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Email => "email",
            SourceType::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(SourceType::Email),
            "pdf" => Some(SourceType::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Granularity
// ============================================================================

/// 청크 세분도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// 짧은 세부 청크 (기본 350~700자)
    Fine,
    /// 긴 문맥 청크 (기본 1500~2500자)
    Coarse,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Fine, Granularity::Coarse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Fine => "fine",
            Granularity::Coarse => "coarse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fine" => Some(Granularity::Fine),
            "coarse" => Some(Granularity::Coarse),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Document
// ============================================================================

/// 인용 표시에 쓰이는 문서 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// 이메일 제목 또는 PDF 제목
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// 원본 날짜 문자열 (형식은 수집기 그대로)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl DocumentMetadata {
    /// 인용 목록에 보여줄 제목 (제목 → 파일명 → 문서 ID 순)
    pub fn display_title(&self, doc_id: &str) -> String {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.filename.as_deref())
            .unwrap_or(doc_id)
            .to_string()
    }
}

/// 인덱싱 대상 문서
///
/// 같은 ID로 다시 인덱싱하면 이전 청크를 모두 대체합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub source_type: SourceType,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(id: impl Into<String>, source_type: SourceType, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_type,
            text: text.into(),
            metadata: DocumentMetadata::default(),
        }
    }

    /// 이메일 문서 생성
    ///
    /// 본문 앞에 제목/발신자/날짜 헤더 줄을 붙여 검색 대상에 포함시킵니다.
    pub fn email(
        message_id: impl Into<String>,
        subject: &str,
        sender: &str,
        date: &str,
        body: &str,
    ) -> Self {
        let text = format!("Subject: {subject}\nFrom: {sender}\nDate: {date}\n\n{body}");
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());

        Self {
            id: message_id.into(),
            source_type: SourceType::Email,
            text,
            metadata: DocumentMetadata {
                title: non_empty(subject),
                sender: non_empty(sender),
                date: non_empty(date),
                filename: None,
            },
        }
    }

    /// PDF 문서 생성 (파일명을 제목으로 사용)
    pub fn pdf(id: impl Into<String>, filename: &str, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_type: SourceType::Pdf,
            text: text.into(),
            metadata: DocumentMetadata {
                title: Some(filename.to_string()),
                filename: Some(filename.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 한 세분도로 잘라낸 연속 텍스트 구간
///
/// `start..end`는 준비된(정제된) 문서 텍스트의 문자 단위 오프셋입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub granularity: Granularity,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    /// 문서 ID + 세분도 + 시작 오프셋으로 청크 ID 생성
    pub fn make_id(doc_id: &str, granularity: Granularity, start: usize) -> String {
        format!("{}:{}:{}", doc_id, granularity.as_str(), start)
    }

    pub fn char_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// 두 구간의 겹침 비율 (교집합 / 짧은 구간 길이)
pub fn span_overlap_ratio(a: (usize, usize), b: (usize, usize)) -> f32 {
    let shorter = (a.1.saturating_sub(a.0)).min(b.1.saturating_sub(b.0));
    if shorter == 0 {
        return 0.0;
    }
    let intersection = a.1.min(b.1).saturating_sub(a.0.max(b.0));
    intersection as f32 / shorter as f32
}

// ============================================================================
// Index Entry
// ============================================================================

/// 이중 인덱스 저장 단위: 벡터와 어휘 표현은 항상 함께 추가·삭제됩니다.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub source_type: SourceType,
    pub metadata: DocumentMetadata,
}

impl IndexEntry {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_document_composes_headers() {
        let doc = Document::email(
            "msg-1",
            "Remote work",
            "hr@example.com",
            "2024-03-01",
            "Remote work permitted 3 days/week.",
        );
        assert_eq!(doc.source_type, SourceType::Email);
        assert!(doc.text.starts_with("Subject: Remote work\nFrom: hr@example.com"));
        assert!(doc.text.ends_with("Remote work permitted 3 days/week."));
        assert_eq!(doc.metadata.title.as_deref(), Some("Remote work"));
    }

    #[test]
    fn test_display_title_fallbacks() {
        let meta = DocumentMetadata::default();
        assert_eq!(meta.display_title("doc-9"), "doc-9");

        let pdf = Document::pdf("p1", "handbook.pdf", "text");
        assert_eq!(pdf.metadata.display_title("p1"), "handbook.pdf");
    }

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(Chunk::make_id("msg-1", Granularity::Fine, 350), "msg-1:fine:350");
        assert_eq!(Granularity::parse("coarse"), Some(Granularity::Coarse));
        assert_eq!(SourceType::parse("pdf"), Some(SourceType::Pdf));
        assert_eq!(SourceType::parse("fax"), None);
    }

    #[test]
    fn test_span_overlap_ratio() {
        assert_eq!(span_overlap_ratio((0, 100), (100, 200)), 0.0);
        assert_eq!(span_overlap_ratio((0, 100), (50, 150)), 0.5);
        // 짧은 구간이 긴 구간 안에 완전히 포함
        assert_eq!(span_overlap_ratio((0, 2000), (300, 700)), 1.0);
        assert_eq!(span_overlap_ratio((10, 10), (0, 100)), 0.0);
    }
}
