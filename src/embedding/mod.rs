//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 청크/쿼리 텍스트를 고정 차원 벡터로 변환합니다.
//! 출력은 입력 텍스트와 모델 버전에만 의존합니다 (재인덱싱 멱등성).
//!
//! - `HashEmbedding`: 로컬 feature hashing (기본값, 네트워크 불필요)
//! - `GeminiEmbedding`: Google Gemini 임베딩 API
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config)?;
//! let vectors = embedder.embed_many(&texts).await?;
//! ```

mod gemini;
mod hash;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingBackend, RagConfig};
use crate::error::{RagError, Result};

pub use gemini::{get_api_key, has_api_key, GeminiEmbedding, GEMINI_DIMENSIONS};
pub use hash::{HashEmbedding, HASH_MODEL_ID};

/// 기본 입력 한도 (문자 수). coarse 청크 최대 크기보다 충분히 큼
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8192;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩 (문서 청크용)
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩, 입력 순서 유지 (기본 구현: 순차 호출)
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 쿼리 임베딩 (비대칭 모델은 태스크 타입이 다름)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 모델 식별자 (인덱스 호환성 판단에 사용)
    fn name(&self) -> &str;

    /// 입력 한도 (문자 수)
    fn max_input_chars(&self) -> usize {
        DEFAULT_MAX_INPUT_CHARS
    }
}

/// 공통 입력 검증: 빈 텍스트, 한도 초과
pub(crate) fn check_input(text: &str, max_chars: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::Embedding("input text is empty".to_string()));
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(RagError::Embedding(format!(
            "input of {len} chars exceeds model limit of {max_chars}"
        )));
    }
    Ok(())
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 따라 임베딩 프로바이더 생성
pub fn create_embedder(config: &RagConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let dimension = config.embedding.dimension;

    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        EmbeddingBackend::Hash => Arc::new(HashEmbedding::new(dimension)),
        EmbeddingBackend::Gemini => {
            if !has_api_key() {
                return Err(RagError::Config(
                    "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
                     Set: export GEMINI_API_KEY=your-api-key\n\
                     Get your API key at: https://aistudio.google.com/app/apikey"
                        .to_string(),
                ));
            }
            Arc::new(GeminiEmbedding::from_env_with_dimension(dimension)?)
        }
    };

    tracing::info!(
        "Using {} embedding (dimension: {})",
        embedder.name(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input() {
        assert!(check_input("hello", 10).is_ok());
        assert!(matches!(check_input("  ", 10), Err(RagError::Embedding(_))));
        assert!(matches!(
            check_input("abcdefghijk", 10),
            Err(RagError::Embedding(_))
        ));
    }

    #[test]
    fn test_create_hash_embedder() {
        let mut config = RagConfig::default();
        config.embedding.dimension = 64;
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 64);
        assert_eq!(embedder.name(), HASH_MODEL_ID);
    }

    #[tokio::test]
    async fn test_default_embed_many_preserves_order() {
        let embedder = HashEmbedding::new(32);
        let texts = vec!["budget review".to_string(), "remote work".to_string()];
        let many = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(many[0], embedder.embed("budget review").await.unwrap());
        assert_eq!(many[1], embedder.embed("remote work").await.unwrap());
    }
}
