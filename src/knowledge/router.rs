//! Query Router - 쿼리 전처리 및 세분도 선택
//!
//! 세부 정보를 찾는 쿼리(정책, 계약, 숫자, 인용구)는 fine 청크로,
//! 맥락을 찾는 쿼리(요약, 진행 상황, 긴 질문)는 coarse 청크로 보냅니다.
//! 신뢰도가 낮으면 양쪽 모두 검색합니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::document::Granularity;
use super::lexical::tokenize;

/// 추출할 최대 키워드 수
pub const MAX_KEYWORDS: usize = 16;

/// 이 토큰 수 이상이면 넓은 맥락 질문으로 간주
const LONG_QUERY_TOKENS: usize = 12;

const FINE_KEYWORDS: &[&str] = &[
    "policy", "policies", "document", "documents", "doc", "docs", "contract", "contracts",
    "agreement", "agreements", "pdf", "attachment", "attachments", "file", "files", "procedure",
    "procedures", "specification", "specifications", "requirement", "requirements", "detail",
    "details", "clause", "clauses", "section", "sections", "invoice", "amount", "deadline",
];

const COARSE_KEYWORDS: &[&str] = &[
    "timeline", "timelines", "summary", "summaries", "summarize", "overview", "update",
    "updates", "progress", "status", "history", "background", "context", "discussion",
    "conversation", "thread", "threads", "overall", "general", "broad",
];

static QUERY_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)\n--\s*\n.*$",
        r"(?is)\nSent from my \w+.*$",
        r"(?is)\nGet Outlook for \w+.*$",
        r"(?is)\nBest regards,.*$",
        r"(?is)\nThanks,.*$",
        r"(?is)\nRegards,.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid signature regex"))
    .collect()
});

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
        r"\b\d{1,2}-\d{1,2}-\d{2,4}\b",
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid date regex"))
    .collect()
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]+"|'[^']{3,}'"#).expect("valid quote regex"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

// ============================================================================
// Types
// ============================================================================

/// 호출자가 요청한 세분도
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranularityHint {
    /// 라우터가 결정
    #[default]
    Auto,
    Fine,
    Coarse,
    Both,
}

impl GranularityHint {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "fine" => Some(Self::Fine),
            "coarse" => Some(Self::Coarse),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// 실제로 검색할 세분도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    Fine,
    Coarse,
    Both,
}

impl Selection {
    pub fn granularities(&self) -> &'static [Granularity] {
        match self {
            Selection::Fine => &[Granularity::Fine],
            Selection::Coarse => &[Granularity::Coarse],
            Selection::Both => &Granularity::ALL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Fine => "fine",
            Selection::Coarse => "coarse",
            Selection::Both => "both",
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 라우팅 결과
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteDecision {
    pub selection: Selection,
    /// 0.0 ~ 1.0 (명시적 힌트는 1.0)
    pub confidence: f32,
}

// ============================================================================
// QueryPreprocessor
// ============================================================================

/// 쿼리 정제 및 키워드 추출
#[derive(Debug, Clone, Default)]
pub struct QueryPreprocessor;

impl QueryPreprocessor {
    /// 서명 제거, 날짜 정규화(`[DATE]`), 공백 정리. 벡터 쪽 입력.
    pub fn clean_query(&self, query: &str) -> String {
        let mut text = strip_signatures(query);
        for pattern in DATE_PATTERNS.iter() {
            text = pattern.replace_all(&text, "[DATE]").into_owned();
        }
        WHITESPACE.replace_all(&text, " ").trim().to_string()
    }

    /// 어휘 검색용 키워드 (중복 제거, 입력 순서 유지)
    ///
    /// 날짜 숫자도 매칭 대상이므로 날짜 정규화 전 텍스트에서 추출합니다.
    pub fn extract_keywords(&self, query: &str, max_keywords: usize) -> Vec<String> {
        let text = strip_signatures(query);
        let mut seen = HashSet::new();
        tokenize(&text)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .take(max_keywords)
            .collect()
    }
}

fn strip_signatures(query: &str) -> String {
    let mut text = query.replace("\r\n", "\n");
    for pattern in QUERY_SIGNATURES.iter() {
        text = pattern.replace(&text, "").into_owned();
    }
    text
}

// ============================================================================
// QueryRouter
// ============================================================================

/// 키워드 기반 세분도 라우터
#[derive(Debug, Clone)]
pub struct QueryRouter {
    min_confidence: f32,
}

impl QueryRouter {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    /// 힌트 해석: 명시적 세분도는 그대로, `Auto`만 라우팅
    pub fn resolve(&self, hint: GranularityHint, query: &str) -> RouteDecision {
        let explicit = |selection| RouteDecision {
            selection,
            confidence: 1.0,
        };
        match hint {
            GranularityHint::Fine => explicit(Selection::Fine),
            GranularityHint::Coarse => explicit(Selection::Coarse),
            GranularityHint::Both => explicit(Selection::Both),
            GranularityHint::Auto => self.route(query),
        }
    }

    /// 쿼리 특성으로 세분도 결정
    pub fn route(&self, query: &str) -> RouteDecision {
        let lower = query.to_lowercase();
        let words: HashSet<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut fine_score = words.iter().filter(|w| FINE_KEYWORDS.contains(*w)).count();
        let mut coarse_score = words.iter().filter(|w| COARSE_KEYWORDS.contains(*w)).count();

        // 구체적 표지: 숫자, 인용구, 이메일 주소
        if words.iter().any(|w| w.chars().any(|c| c.is_ascii_digit())) {
            fine_score += 1;
        }
        if QUOTED.is_match(query) {
            fine_score += 1;
        }
        if EMAIL.is_match(query) {
            fine_score += 1;
        }
        if tokenize(query).len() >= LONG_QUERY_TOKENS {
            coarse_score += 1;
        }

        let (selection, confidence) = if fine_score > coarse_score {
            (Selection::Fine, score_confidence(fine_score - coarse_score))
        } else if coarse_score > fine_score {
            (Selection::Coarse, score_confidence(coarse_score - fine_score))
        } else {
            (Selection::Both, 0.5)
        };

        let decision = if confidence < self.min_confidence {
            RouteDecision {
                selection: Selection::Both,
                confidence,
            }
        } else {
            RouteDecision {
                selection,
                confidence,
            }
        };

        tracing::debug!(
            "Routed query to {} (fine={}, coarse={}, confidence={:.2})",
            decision.selection,
            fine_score,
            coarse_score,
            decision.confidence
        );
        decision
    }
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new(0.65)
    }
}

fn score_confidence(diff: usize) -> f32 {
    (0.6 + 0.1 * diff as f32).min(0.9)
}

// ============================================================================
// Tests
// ============================================================================
