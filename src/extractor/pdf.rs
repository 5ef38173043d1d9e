//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use std::path::Path;

use anyhow::{Context, Result};

/// PDF에서 텍스트 추출
///
/// 페이지 경계(폼피드)는 문단 구분으로 바꿔 청커가 경계로 사용할 수 있게 합니다.
/// 텍스트 레이어가 없는 스캔 문서는 빈 문자열을 반환합니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(String::new());
    }

    Ok(join_pages(&text))
}

/// 페이지별 텍스트를 빈 줄로 이어 붙임
fn join_pages(text: &str) -> String {
    text.split('\x0c')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_pages_with_formfeed() {
        let text = "Page 1 content\x0c  Page 2 content \x0c\x0cPage 3 content";
        assert_eq!(
            join_pages(text),
            "Page 1 content\n\nPage 2 content\n\nPage 3 content"
        );
    }

    #[test]
    fn test_join_pages_no_separator() {
        assert_eq!(join_pages("Just some text"), "Just some text");
    }

    #[test]
    fn test_missing_pdf_is_error() {
        assert!(extract_text_from_pdf(Path::new("/nonexistent/file.pdf")).is_err());
    }
}
