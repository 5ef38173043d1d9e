//! Feature-hashing 임베딩
//!
//! 토큰 unigram + bigram을 FNV-1a로 해싱해 부호 있는 버킷에 누적한 뒤 L2 정규화합니다.
//! 모델 파일이나 네트워크가 필요 없고, 같은 텍스트는 항상 같은 벡터가 됩니다.

use async_trait::async_trait;

use super::{check_input, EmbeddingProvider, DEFAULT_MAX_INPUT_CHARS};
use crate::error::Result;
use crate::knowledge::{l2_normalize, tokenize};

/// 모델 식별자 (해싱 방식이 바뀌면 올릴 것)
pub const HASH_MODEL_ID: &str = "hash-fnv1a-v1";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// bigram 가중치 (unigram = 1.0)
const BIGRAM_WEIGHT: f32 = 0.5;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(FNV_PRIME)
    })
}

/// 해시 임베딩
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
    max_input_chars: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    /// 동기 임베딩 (async 트레이트 구현이 그대로 사용)
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;

        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_sync(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        HASH_MODEL_ID
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

// ============================================================================
// Tests
// ============================================================================
