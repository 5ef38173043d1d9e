//! 에러 타입
//!
//! 인덱싱/검색 코어가 외부 협력자(수집 파이프라인, 생성 단계)에 노출하는 에러 분류입니다.
//! 쿼리 타임아웃은 에러가 아니라 `RetrievalResult::degraded`로 보고됩니다.

use thiserror::Error;

/// 코어 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 빈 식별자나 텍스트가 아닌 입력 - 해당 문서만 건너뜀
    #[error("segmentation failed for '{doc_id}': {reason}")]
    Segmentation { doc_id: String, reason: String },

    /// 모델 실패 또는 입력 한도 초과
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// 저장소가 열리지 않았거나 손상됨 - 호출자는 "근거 없음"으로 처리
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// 영속화 실패
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// 잘못된 설정
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RagError {
    pub fn segmentation(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Segmentation {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }

    /// 생성 단계가 "근거 없음"으로 폴백해야 하는 에러인지
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
