//! Index/Retrieval Telemetry
//!
//! 쿼리 지연, 엔진 타임아웃, 인덱싱 결과를 원자 카운터로 집계합니다.
//! 대시보드용 읽기 전용 스냅샷은 `snapshot()`으로 얻습니다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use super::fusion::Engine;

/// p95 계산에 쓰는 최근 쿼리 수
const LATENCY_WINDOW: usize = 1024;

/// 카운터 집합
#[derive(Debug)]
pub struct Telemetry {
    budget_ms: u64,
    slow_query_ms: u64,

    queries: AtomicU64,
    total_latency_us: AtomicU64,
    slow_queries: AtomicU64,
    degraded_queries: AtomicU64,
    vector_degraded: AtomicU64,
    lexical_degraded: AtomicU64,
    unavailable: AtomicU64,

    documents_indexed: AtomicU64,
    documents_unchanged: AtomicU64,
    documents_skipped: AtomicU64,
    documents_failed: AtomicU64,
    chunks_indexed: AtomicU64,
    embedding_retries: AtomicU64,

    recent_latencies: Mutex<VecDeque<f64>>,
}

/// 텔레메트리 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub total_queries: u64,
    pub total_time_ms: f64,
    pub average_time_ms: f64,
    pub p95_time_ms: f64,
    pub target_time_ms: u64,
    /// A: 평균이 예산 이내, B: 예산의 2배 이내, C: 그 이상
    pub performance_grade: char,
    pub slow_queries: u64,
    pub degraded_queries: u64,
    pub vector_degraded: u64,
    pub lexical_degraded: u64,
    pub unavailable_queries: u64,
    pub documents_indexed: u64,
    pub documents_unchanged: u64,
    pub documents_skipped: u64,
    pub documents_failed: u64,
    pub chunks_indexed: u64,
    pub embedding_retries: u64,
}

impl Telemetry {
    pub fn new(budget_ms: u64, slow_query_ms: u64) -> Self {
        Self {
            budget_ms,
            slow_query_ms,
            queries: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            degraded_queries: AtomicU64::new(0),
            vector_degraded: AtomicU64::new(0),
            lexical_degraded: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            documents_indexed: AtomicU64::new(0),
            documents_unchanged: AtomicU64::new(0),
            documents_skipped: AtomicU64::new(0),
            documents_failed: AtomicU64::new(0),
            chunks_indexed: AtomicU64::new(0),
            embedding_retries: AtomicU64::new(0),
            recent_latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    /// 완료된 쿼리 기록
    pub fn record_query(&self, latency_ms: f64, degraded_engines: &[Engine]) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add((latency_ms * 1000.0) as u64, Ordering::Relaxed);

        if latency_ms > self.slow_query_ms as f64 {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
        if !degraded_engines.is_empty() {
            self.degraded_queries.fetch_add(1, Ordering::Relaxed);
        }
        for engine in degraded_engines {
            match engine {
                Engine::Vector => self.vector_degraded.fetch_add(1, Ordering::Relaxed),
                Engine::Lexical => self.lexical_degraded.fetch_add(1, Ordering::Relaxed),
            };
        }

        if let Ok(mut recent) = self.recent_latencies.lock() {
            if recent.len() == LATENCY_WINDOW {
                recent.pop_front();
            }
            recent.push_back(latency_ms);
        }
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexed(&self, chunks: usize) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunks as u64, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.documents_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.documents_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_embedding_retry(&self) {
        self.embedding_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let total_queries = self.queries.load(Ordering::Relaxed);
        let total_time_ms = self.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let average_time_ms = if total_queries > 0 {
            total_time_ms / total_queries as f64
        } else {
            0.0
        };

        let p95_time_ms = self
            .recent_latencies
            .lock()
            .map(|recent| percentile(recent.iter().copied().collect(), 0.95))
            .unwrap_or(0.0);

        let budget = self.budget_ms as f64;
        let performance_grade = if average_time_ms < budget {
            'A'
        } else if average_time_ms < budget * 2.0 {
            'B'
        } else {
            'C'
        };

        TelemetrySnapshot {
            total_queries,
            total_time_ms: round2(total_time_ms),
            average_time_ms: round2(average_time_ms),
            p95_time_ms: round2(p95_time_ms),
            target_time_ms: self.budget_ms,
            performance_grade,
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            degraded_queries: self.degraded_queries.load(Ordering::Relaxed),
            vector_degraded: self.vector_degraded.load(Ordering::Relaxed),
            lexical_degraded: self.lexical_degraded.load(Ordering::Relaxed),
            unavailable_queries: self.unavailable.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            documents_unchanged: self.documents_unchanged.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            embedding_retries: self.embedding_retries.load(Ordering::Relaxed),
        }
    }
}

/// nearest-rank 백분위수
fn percentile(mut values: Vec<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = ((p * values.len() as f64).ceil() as usize).clamp(1, values.len());
    values[rank - 1]
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let telemetry = Telemetry::new(150, 150);
        let snap = telemetry.snapshot();
        assert_eq!(snap.total_queries, 0);
        assert_eq!(snap.average_time_ms, 0.0);
        assert_eq!(snap.p95_time_ms, 0.0);
        assert_eq!(snap.performance_grade, 'A');
    }

    #[test]
    fn test_query_counters() {
        let telemetry = Telemetry::new(150, 100);
        telemetry.record_query(20.0, &[]);
        telemetry.record_query(40.0, &[Engine::Vector]);
        telemetry.record_query(180.0, &[Engine::Vector, Engine::Lexical]);

        let snap = telemetry.snapshot();
        assert_eq!(snap.total_queries, 3);
        assert_eq!(snap.average_time_ms, 80.0);
        assert_eq!(snap.slow_queries, 1);
        assert_eq!(snap.degraded_queries, 2);
        assert_eq!(snap.vector_degraded, 2);
        assert_eq!(snap.lexical_degraded, 1);
        assert_eq!(snap.p95_time_ms, 180.0);
        assert_eq!(snap.performance_grade, 'A');
    }

    #[test]
    fn test_performance_grade() {
        let telemetry = Telemetry::new(100, 100);
        telemetry.record_query(150.0, &[]);
        assert_eq!(telemetry.snapshot().performance_grade, 'B');
        telemetry.record_query(500.0, &[]);
        assert_eq!(telemetry.snapshot().performance_grade, 'C');
    }

    #[test]
    fn test_indexing_counters() {
        let telemetry = Telemetry::new(150, 150);
        telemetry.record_indexed(5);
        telemetry.record_indexed(3);
        telemetry.record_unchanged();
        telemetry.record_skipped();
        telemetry.record_failed();
        telemetry.record_embedding_retry();

        let snap = telemetry.snapshot();
        assert_eq!(snap.documents_indexed, 2);
        assert_eq!(snap.chunks_indexed, 8);
        assert_eq!(snap.documents_unchanged, 1);
        assert_eq!(snap.documents_skipped, 1);
        assert_eq!(snap.documents_failed, 1);
        assert_eq!(snap.embedding_retries, 1);
    }

    #[test]
    fn test_percentile() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(values, 0.95), 95.0);
        assert_eq!(percentile(vec![7.0], 0.95), 7.0);
    }
}
