//! 문서 정제
//!
//! 청킹 전에 이메일 서명 보일러플레이트를 제거하고 민감 정보를 마스킹합니다.
//! 문단 경계(빈 줄)는 청커가 사용하므로 유지합니다.

use std::sync::LazyLock;

use regex::Regex;

/// 마스킹 치환 문자열
pub const REDACTED: &str = "[REDACTED]";

/// 서명 이후를 통째로 잘라내는 패턴
static SIGNATURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)\n--[ \t]*\n.*$",
        r"(?s)\nSent from my \w+.*$",
        r"(?s)\nGet Outlook for \w+.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid signature regex"))
    .collect()
});

/// 민감 정보 패턴 (적용 순서 중요: 카드번호가 OTP보다 먼저)
static REDACTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bsecret\s*[:=]\s*\S+",
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        r"\b(?:\d{4}[ \t-]?){3}\d{4}\b",
        r"\b\d{6}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid redaction regex"))
    .collect()
});

static INLINE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}\u{3000}]+").expect("valid whitespace regex"));

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));

/// 문서 정제기
#[derive(Debug, Clone)]
pub struct TextCleaner {
    redact: bool,
}

impl TextCleaner {
    pub fn new(redact: bool) -> Self {
        Self { redact }
    }

    /// 인덱싱용 텍스트 준비
    pub fn prepare(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }

        let mut text = text.replace("\r\n", "\n").replace('\r', "\n");

        for pattern in SIGNATURE_PATTERNS.iter() {
            text = pattern.replace(&text, "").into_owned();
        }

        if self.redact {
            text = redact(&text);
        }

        normalize_whitespace(&text)
    }
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self::new(true)
    }
}

/// 민감 정보 마스킹
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in REDACTION_PATTERNS.iter() {
        out = pattern.replace_all(&out, REDACTED).into_owned();
    }
    out
}

/// 줄 안의 공백은 하나로, 빈 줄은 최대 하나로 정리
fn normalize_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| INLINE_WHITESPACE.replace_all(line, " ").trim().to_string())
        .collect();

    EXCESS_NEWLINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_empty() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.prepare(""), "");
        assert_eq!(cleaner.prepare("  \n\t "), "");
    }

    #[test]
    fn test_strips_signatures() {
        let cleaner = TextCleaner::new(false);
        let text = "Meeting moved to Friday.\n--\nJane Doe\nAcme Corp";
        assert_eq!(cleaner.prepare(text), "Meeting moved to Friday.");

        let text = "See attached.\nSent from my iPhone";
        assert_eq!(cleaner.prepare(text), "See attached.");
    }

    #[test]
    fn test_redacts_sensitive_values() {
        let text = "Your code is 123456. Mail bob@example.com, card 4111 1111 1111 1111, secret: hunter2";
        let out = redact(text);
        assert!(!out.contains("123456"));
        assert!(!out.contains("bob@example.com"));
        assert!(!out.contains("4111"));
        assert!(!out.contains("hunter2"));
        assert_eq!(out.matches(REDACTED).count(), 4);
    }

    #[test]
    fn test_redaction_can_be_disabled() {
        let cleaner = TextCleaner::new(false);
        assert_eq!(cleaner.prepare("code 123456"), "code 123456");
    }

    #[test]
    fn test_keeps_paragraph_breaks() {
        let cleaner = TextCleaner::new(false);
        let text = "First   paragraph\r\n\r\n\r\n\r\nSecond\t\tparagraph  ";
        assert_eq!(cleaner.prepare(text), "First paragraph\n\nSecond paragraph");
    }
}
