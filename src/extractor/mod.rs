//! 콘텐츠 추출 모듈
//!
//! 수집된 파일을 인덱싱용 `Document`로 변환합니다.
//! - .eml: 헤더(Subject/From/Date/Message-ID) + 본문
//! - .pdf: pdf-extract로 텍스트 추출, 파일명을 제목으로
//! - .txt/.md: 본문만 저장된 메일로 취급

pub mod pdf;

use std::path::Path;

use anyhow::{Context, Result};

use crate::collector::{CollectedFile, FileType};
use crate::knowledge::{Document, DocumentMetadata, SourceType};

// ============================================================================
// Content Extractor
// ============================================================================

/// 콘텐츠 추출기
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 파일에서 문서 추출
    pub async fn extract(&self, file: &CollectedFile) -> Result<Document> {
        match file.file_type {
            FileType::Email => self.extract_email(&file.path).await,
            FileType::Pdf => self.extract_pdf(&file.path).await,
            FileType::Text => self.extract_text(&file.path).await,
        }
    }

    async fn extract_email(&self, path: &Path) -> Result<Document> {
        let raw = read_lossy(path).await?;
        let message = parse_email(&raw);

        let id = message
            .message_id
            .clone()
            .unwrap_or_else(|| path_id(path));

        Ok(Document::email(
            id,
            message.subject.as_deref().unwrap_or_default(),
            message.from.as_deref().unwrap_or_default(),
            message.date.as_deref().unwrap_or_default(),
            &message.body,
        ))
    }

    async fn extract_pdf(&self, path: &Path) -> Result<Document> {
        // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&owned))
            .await
            .context("PDF extraction task failed")??;

        Ok(Document::pdf(path_id(path), &file_name(path), text))
    }

    async fn extract_text(&self, path: &Path) -> Result<Document> {
        let text = read_lossy(path).await?;
        let name = file_name(path);

        Ok(
            Document::new(path_id(path), SourceType::Email, text).with_metadata(DocumentMetadata {
                title: Some(name.clone()),
                filename: Some(name),
                ..Default::default()
            }),
        )
    }
}

/// UTF-8이 아닌 바이트는 대체 문자로
async fn read_lossy(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// 파일 기반 문서 ID (경로 그대로, 재수집 시 같은 ID)
fn path_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_id(path))
}

// ============================================================================
// Email Parsing
// ============================================================================

/// .eml에서 필요한 부분만 읽은 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
    pub body: String,
}

/// RFC 822 헤더 + 본문 분리
///
/// 접힌 헤더(공백으로 시작하는 줄)는 앞 헤더에 이어 붙입니다.
/// MIME 멀티파트는 해석하지 않고 본문 전체를 텍스트로 취급합니다.
pub fn parse_email(raw: &str) -> ParsedEmail {
    let raw = raw.replace("\r\n", "\n");
    let (head, body) = match raw.split_once("\n\n") {
        Some((head, body)) => (head, body),
        None => (raw.as_str(), ""),
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    // 헤더가 하나도 없으면 전체가 본문
    if headers.is_empty() {
        return ParsedEmail {
            body: raw.trim().to_string(),
            ..Default::default()
        };
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    };

    ParsedEmail {
        message_id: header("message-id")
            .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string()),
        subject: header("subject"),
        from: header("from"),
        date: header("date"),
        body: body.trim().to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
