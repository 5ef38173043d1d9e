//! 하이브리드 검색 - 벡터 + BM25 병렬 실행
//!
//! 쿼리 하나는 스냅샷 하나에 대해 실행됩니다. 두 엔진은 동시에 돌고,
//! 각각 `engine_timeout_ms` 안에 끝나지 않으면 빈 후보로 처리한 뒤
//! 남은 쪽 결과만으로 융합합니다 (`degraded = true`).
//! 타임아웃은 블로킹 스캔을 취소하지 못하므로 스캔 자체도 같은 마감 시각을 확인합니다.
//!
//! 유사도가 0 이하인 벡터 후보는 신호가 없으므로 융합에 넘기지 않습니다.
//!
//! ```text
//! query ─┬─ clean_query ──► embed_query ──► vector scan ─┐
//!        └─ extract_keywords ──────────► BM25 ───────────┴─► fuse ─► RetrievalResult
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

use super::document::Granularity;
use super::fusion::{fuse, Engine, RetrievalResult};
use super::index::{IndexSnapshot, ScoredChunk};
use super::router::{GranularityHint, QueryPreprocessor, QueryRouter, MAX_KEYWORDS};

// ============================================================================
// Types
// ============================================================================

/// 검색 요청
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub k: usize,
    #[serde(default)]
    pub granularity: GranularityHint,
    /// None이면 설정의 `default_alpha`
    #[serde(default)]
    pub alpha: Option<f32>,
}

impl Query {
    pub fn new(text: impl Into<String>, k: usize) -> Self {
        Self {
            text: text.into(),
            k,
            granularity: GranularityHint::Auto,
            alpha: None,
        }
    }

    pub fn with_granularity(mut self, granularity: GranularityHint) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }
}

/// 검색 파라미터 (설정에서 추출)
#[derive(Debug, Clone)]
struct SearchParams {
    default_alpha: f32,
    engine_timeout: Duration,
    dedup_threshold: f32,
    candidate_multiplier: usize,
    slow_query_ms: u64,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 상태가 없으므로 여러 쿼리가 동시에 같은 인스턴스를 사용할 수 있습니다.
pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    router: QueryRouter,
    preprocessor: QueryPreprocessor,
    params: SearchParams,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self {
            embedder,
            router: QueryRouter::new(config.router_min_confidence),
            preprocessor: QueryPreprocessor,
            params: SearchParams {
                default_alpha: config.default_alpha,
                engine_timeout: Duration::from_millis(config.engine_timeout_ms),
                dedup_threshold: config.dedup_overlap_threshold,
                candidate_multiplier: config.candidate_multiplier.max(1),
                slow_query_ms: config.slow_query_threshold_ms(),
            },
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 스냅샷 하나에 대해 검색
    ///
    /// 엔진 실패나 타임아웃은 에러가 아니라 `degraded`로 보고됩니다.
    pub async fn retrieve(&self, snapshot: Arc<IndexSnapshot>, query: &Query) -> RetrievalResult {
        let started = Instant::now();
        let decision = self.router.resolve(query.granularity, &query.text);

        let mut result = RetrievalResult::empty(decision.selection);
        result.route_confidence = decision.confidence;

        let keywords = self
            .preprocessor
            .extract_keywords(&query.text, MAX_KEYWORDS);
        let cleaned = self.preprocessor.clean_query(&query.text);

        if query.k == 0 || snapshot.is_empty() || (keywords.is_empty() && cleaned.is_empty()) {
            result.latency_ms = elapsed_ms(started);
            return result;
        }

        let granularities = decision.selection.granularities();
        let candidates = query.k.saturating_mul(self.params.candidate_multiplier);
        let deadline = Instant::now() + self.params.engine_timeout;

        let vector_task = self.with_timeout(
            Engine::Vector,
            self.vector_candidates(
                Arc::clone(&snapshot),
                cleaned,
                granularities,
                candidates,
                deadline,
            ),
        );
        let lexical_task = self.with_timeout(
            Engine::Lexical,
            lexical_candidates(
                Arc::clone(&snapshot),
                keywords,
                granularities,
                candidates,
                deadline,
            ),
        );
        let (vector, lexical) = tokio::join!(vector_task, lexical_task);

        let mut timed_out = Vec::new();
        let vector = vector.unwrap_or_else(|| {
            timed_out.push(Engine::Vector);
            Vec::new()
        });
        let lexical = lexical.unwrap_or_else(|| {
            timed_out.push(Engine::Lexical);
            Vec::new()
        });

        let alpha = query.alpha.unwrap_or(self.params.default_alpha);
        result.items = fuse(&vector, &lexical, alpha, self.params.dedup_threshold, query.k);
        result.degraded = !timed_out.is_empty();
        result.timed_out_engines = timed_out;
        result.latency_ms = elapsed_ms(started);

        if result.latency_ms > self.params.slow_query_ms as f64 {
            tracing::warn!(
                "Slow query ({:.1}ms, selection={}, results={})",
                result.latency_ms,
                result.selection,
                result.len()
            );
        } else {
            tracing::debug!(
                "Query done in {:.1}ms: {} vector / {} lexical candidates -> {} results",
                result.latency_ms,
                vector.len(),
                lexical.len(),
                result.len()
            );
        }

        result
    }

    /// 엔진 실행에 타임아웃 적용. 실패/타임아웃이면 None
    async fn with_timeout<F>(&self, engine: Engine, task: F) -> Option<Vec<ScoredChunk>>
    where
        F: std::future::Future<Output = Result<Vec<ScoredChunk>>>,
    {
        match tokio::time::timeout(self.params.engine_timeout, task).await {
            Ok(Ok(candidates)) => Some(candidates),
            Ok(Err(e)) => {
                tracing::warn!("{} engine failed, continuing without it: {}", engine, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "{} engine exceeded {}ms, continuing without it",
                    engine,
                    self.params.engine_timeout.as_millis()
                );
                None
            }
        }
    }

    async fn vector_candidates(
        &self,
        snapshot: Arc<IndexSnapshot>,
        cleaned: String,
        granularities: &'static [Granularity],
        k: usize,
        deadline: Instant,
    ) -> Result<Vec<ScoredChunk>> {
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        // 입력 한도를 넘는 쿼리는 잘라서 임베딩
        let limit = self.embedder.max_input_chars();
        let text: String = if cleaned.chars().count() > limit {
            cleaned.chars().take(limit).collect()
        } else {
            cleaned
        };

        let query_vector = self.embedder.embed_query(&text).await?;

        // 불용어만 있는 쿼리 등
        if query_vector.iter().all(|x| *x == 0.0) {
            tracing::debug!("Query embedding is all zeros, skipping vector scan");
            return Ok(Vec::new());
        }

        let candidates = tokio::task::spawn_blocking(move || {
            let mut candidates = Vec::new();
            for g in granularities {
                let found = snapshot
                    .vector_search_until(&query_vector, *g, k, deadline)
                    .ok_or_else(|| anyhow!("Vector scan passed its deadline"))?;
                candidates.extend(found.into_iter().filter(|c| c.score > 0.0));
            }
            Ok::<_, anyhow::Error>(candidates)
        })
        .await
        .map_err(|e| anyhow!("Vector search task failed: {}", e))??;

        Ok(candidates)
    }
}

async fn lexical_candidates(
    snapshot: Arc<IndexSnapshot>,
    keywords: Vec<String>,
    granularities: &'static [Granularity],
    k: usize,
    deadline: Instant,
) -> Result<Vec<ScoredChunk>> {
    if keywords.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = tokio::task::spawn_blocking(move || {
        let mut candidates = Vec::new();
        for g in granularities {
            if Instant::now() >= deadline {
                return Err(anyhow!("Lexical scan passed its deadline"));
            }
            candidates.extend(snapshot.lexical_search(&keywords, *g, k));
        }
        Ok(candidates)
    })
    .await
    .map_err(|e| anyhow!("Lexical search task failed: {}", e))??;

    Ok(candidates)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// ============================================================================
// Tests
// ============================================================================
