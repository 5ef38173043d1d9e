//! 설정 모듈
//!
//! 청크 크기, 융합 가중치, 지연 예산 등을 명시적인 타입 필드로 관리합니다.
//!
//! 로딩 순서 (뒤가 우선):
//! 1. `RagConfig::default()`
//! 2. `<data_dir>/config.toml` (또는 `MAILRAG_CONFIG` 경로)
//! 3. `MAILRAG_*` 환경변수 (중첩 키는 `__`로 구분, 예: `MAILRAG_EMBEDDING__PROVIDER=gemini`)

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::knowledge::{ChunkConfig, Granularity};

/// 환경변수 접두사
const ENV_PREFIX: &str = "MAILRAG_";

/// 설정 파일 경로를 지정하는 환경변수
const CONFIG_PATH_ENV: &str = "MAILRAG_CONFIG";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.mailrag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mailrag")
}

// ============================================================================
// Types
// ============================================================================

/// 임베딩 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// 로컬 feature-hashing 임베딩 (네트워크 불필요, 결정적)
    Hash,
    /// Google Gemini 임베딩 API
    Gemini,
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Hash,
            dimension: 384,
        }
    }
}

/// 배치 인덱싱 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// 동시에 임베딩할 문서 수
    pub concurrency: usize,
    /// 저장소 커밋 한 번에 묶을 문서 수
    pub commit_batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            commit_batch_size: 32,
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 데이터 디렉토리 (SQLite 파일 위치)
    pub data_dir: PathBuf,
    /// fine 청크 (최소, 최대) 문자 수
    pub fine_chunk_bounds: (usize, usize),
    /// coarse 청크 (최소, 최대) 문자 수
    pub coarse_chunk_bounds: (usize, usize),
    /// 인접 청크 간 오버랩 비율 (0.0 ~ 0.5)
    pub overlap_fraction: f32,
    /// 벡터 점수 가중치 (1-alpha는 어휘 점수)
    pub default_alpha: f32,
    /// 검색 전체 지연 예산 (ms)
    pub latency_budget_ms: u64,
    /// 엔진별 타임아웃 (ms, 지연 예산 이하)
    pub engine_timeout_ms: u64,
    /// 느린 쿼리로 기록할 임계값 (ms). 없으면 지연 예산
    pub slow_query_ms: Option<u64>,
    /// 같은 문서 청크 중복 제거 임계값 (짧은 구간 대비 겹침 비율)
    pub dedup_overlap_threshold: f32,
    /// 엔진별 후보 수 = k * multiplier
    pub candidate_multiplier: usize,
    /// 이 값 미만 신뢰도의 라우팅은 양쪽 모두 검색
    pub router_min_confidence: f32,
    /// 민감 정보 마스킹 여부
    pub redact_sensitive: bool,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            fine_chunk_bounds: (350, 700),
            coarse_chunk_bounds: (1500, 2500),
            overlap_fraction: 0.15,
            default_alpha: 0.7,
            latency_budget_ms: 150,
            engine_timeout_ms: 120,
            slow_query_ms: None,
            dedup_overlap_threshold: 0.5,
            candidate_multiplier: 4,
            router_min_confidence: 0.65,
            redact_sensitive: true,
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
        }
    }
}

impl RagConfig {
    /// 기본 위치에서 설정 로드
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| get_data_dir().join("config.toml"));
        Self::load_from(&path)
    }

    /// 지정한 TOML 파일 + 환경변수로 설정 로드 (파일이 없으면 기본값)
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: RagConfig = Figment::from(Serialized::defaults(RagConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| RagError::Config(e.to_string()))?;

        config.validate()?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// 테스트 및 임시 저장소용: 데이터 디렉토리만 바꾼 기본 설정
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        for (name, (min, max)) in [
            ("fine_chunk_bounds", self.fine_chunk_bounds),
            ("coarse_chunk_bounds", self.coarse_chunk_bounds),
        ] {
            if min == 0 || min > max {
                return Err(RagError::Config(format!(
                    "{name} must satisfy 0 < min <= max, got ({min}, {max})"
                )));
            }
        }
        if !(0.0..=0.5).contains(&self.overlap_fraction) {
            return Err(RagError::Config(format!(
                "overlap_fraction must be within [0, 0.5], got {}",
                self.overlap_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.default_alpha) {
            return Err(RagError::Config(format!(
                "default_alpha must be within [0, 1], got {}",
                self.default_alpha
            )));
        }
        if !(self.dedup_overlap_threshold > 0.0 && self.dedup_overlap_threshold <= 1.0) {
            return Err(RagError::Config(format!(
                "dedup_overlap_threshold must be within (0, 1], got {}",
                self.dedup_overlap_threshold
            )));
        }
        if !(self.router_min_confidence > 0.0 && self.router_min_confidence <= 1.0) {
            return Err(RagError::Config(format!(
                "router_min_confidence must be within (0, 1], got {}",
                self.router_min_confidence
            )));
        }
        if self.latency_budget_ms == 0 || self.engine_timeout_ms == 0 {
            return Err(RagError::Config(
                "latency_budget_ms and engine_timeout_ms must be positive".to_string(),
            ));
        }
        if self.engine_timeout_ms > self.latency_budget_ms {
            return Err(RagError::Config(format!(
                "engine_timeout_ms ({}) must not exceed latency_budget_ms ({})",
                self.engine_timeout_ms, self.latency_budget_ms
            )));
        }
        if self.candidate_multiplier == 0 {
            return Err(RagError::Config(
                "candidate_multiplier must be positive".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.indexing.concurrency == 0 || self.indexing.commit_batch_size == 0 {
            return Err(RagError::Config(
                "indexing.concurrency and indexing.commit_batch_size must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// 느린 쿼리 임계값 (ms)
    pub fn slow_query_threshold_ms(&self) -> u64 {
        self.slow_query_ms.unwrap_or(self.latency_budget_ms)
    }

    /// 세분도별 청킹 설정
    pub fn chunk_config(&self, granularity: Granularity) -> ChunkConfig {
        let (min_characters, max_characters) = match granularity {
            Granularity::Fine => self.fine_chunk_bounds,
            Granularity::Coarse => self.coarse_chunk_bounds,
        };
        ChunkConfig {
            min_characters,
            max_characters,
            overlap_fraction: self.overlap_fraction,
        }
    }

    /// SQLite 파일 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fine_chunk_bounds, (350, 700));
        assert_eq!(config.coarse_chunk_bounds, (1500, 2500));
        assert_eq!(config.default_alpha, 0.7);
        assert_eq!(config.latency_budget_ms, 150);
        assert_eq!(config.dedup_overlap_threshold, 0.5);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
fine_chunk_bounds = [200, 400]
default_alpha = 0.5

[embedding]
dimension = 128
"#,
        )
        .unwrap();

        let config = RagConfig::load_from(&path).unwrap();
        assert_eq!(config.fine_chunk_bounds, (200, 400));
        assert_eq!(config.default_alpha, 0.5);
        assert_eq!(config.embedding.dimension, 128);
        assert_eq!(config.embedding.provider, EmbeddingBackend::Hash);
        // 지정하지 않은 값은 기본값 유지
        assert_eq!(config.coarse_chunk_bounds, (1500, 2500));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RagConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.latency_budget_ms, 150);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RagConfig::default();
        config.fine_chunk_bounds = (800, 700);
        assert!(matches!(config.validate(), Err(RagError::Config(_))));

        let mut config = RagConfig::default();
        config.overlap_fraction = 0.9;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.default_alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.dedup_overlap_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_timeout_must_fit_budget() {
        let mut config = RagConfig::default();
        config.latency_budget_ms = 50;
        assert!(matches!(config.validate(), Err(RagError::Config(_))));

        config.engine_timeout_ms = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_slow_query_threshold_follows_budget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "latency_budget_ms = 400\n").unwrap();

        let config = RagConfig::load_from(&path).unwrap();
        assert_eq!(config.slow_query_ms, None);
        assert_eq!(config.slow_query_threshold_ms(), 400);

        std::fs::write(&path, "latency_budget_ms = 400\nslow_query_ms = 250\n").unwrap();
        let config = RagConfig::load_from(&path).unwrap();
        assert_eq!(config.slow_query_threshold_ms(), 250);
    }

    #[test]
    fn test_chunk_config_per_granularity() {
        let config = RagConfig::default();
        let fine = config.chunk_config(Granularity::Fine);
        assert_eq!(fine.min_characters, 350);
        assert_eq!(fine.max_characters, 700);
        let coarse = config.chunk_config(Granularity::Coarse);
        assert_eq!(coarse.max_characters, 2500);
    }
}
