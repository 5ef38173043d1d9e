//! CLI 모듈
//!
//! mailrag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, CollectorConfig, FileCollector};
use crate::config::RagConfig;
use crate::embedding::create_embedder;
use crate::extractor::ContentExtractor;
use crate::knowledge::{GranularityHint, KnowledgeService, Query, SourceType};

/// `--json` 출력 시 근거 텍스트 총량 한도
const MAX_CONTEXT_CHARS: usize = 2000;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "mailrag")]
#[command(version, about = "이메일·PDF 로컬 하이브리드 RAG 인덱스", long_about = None)]
pub struct Cli {
    /// 설정 파일 (기본: ~/.mailrag/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 데이터 디렉토리 (설정 파일 값보다 우선)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더(.eml, .pdf, .txt)를 인덱싱
    Ingest {
        /// 파일 또는 폴더 경로 (폴더는 재귀)
        path: PathBuf,

        /// PDF 파일 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,
    },

    /// 인덱스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// 세분도: auto, fine, coarse, both
        #[arg(short, long, default_value = "auto")]
        granularity: String,

        /// 벡터 점수 가중치 (0.0 ~ 1.0, 기본: 설정값)
        #[arg(short, long)]
        alpha: Option<f32>,

        /// 생성 단계용 근거 JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 인덱싱된 문서 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서의 청크 보기
    Show {
        /// 문서 ID
        id: String,

        /// 최대 청크 수
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        id: String,
    },

    /// 저장된 문서 재분할/재임베딩
    Reindex {
        /// 최근 인덱싱된 문서 N개만
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 인덱스 전체 삭제
    Clear {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ingest { path, skip_pdfs } => cmd_ingest(config, path, skip_pdfs).await,
        Commands::Query {
            query,
            limit,
            granularity,
            alpha,
            json,
        } => cmd_query(config, &query, limit, &granularity, alpha, json).await,
        Commands::List { limit } => cmd_list(config, limit).await,
        Commands::Show { id, limit } => cmd_show(config, &id, limit).await,
        Commands::Delete { id } => cmd_delete(config, &id).await,
        Commands::Reindex { limit } => cmd_reindex(config, limit).await,
        Commands::Clear { yes } => cmd_clear(config, yes).await,
        Commands::Status => cmd_status(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<RagConfig> {
    let mut config = match cli.config {
        Some(ref path) => RagConfig::load_from(path),
        None => RagConfig::load(),
    }
    .context("설정 로드 실패")?;

    if let Some(ref data_dir) = cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    Ok(config)
}

async fn open_service(config: RagConfig) -> Result<KnowledgeService> {
    let embedder = create_embedder(&config).context("임베딩 프로바이더 생성 실패")?;
    KnowledgeService::open(config, embedder)
        .await
        .context("인덱스 열기 실패")
}

/// 인덱싱 명령어 (ingest)
async fn cmd_ingest(config: RagConfig, path: PathBuf, skip_pdfs: bool) -> Result<()> {
    let collector = FileCollector::new(CollectorConfig {
        skip_pdfs,
        ..Default::default()
    });
    let files = collector.collect(&path)?;

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!(
        "    메일: {}, PDF: {}, 텍스트: {}",
        stats.email_files, stats.pdf_files, stats.text_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let extractor = ContentExtractor::new();
    let mut documents = Vec::with_capacity(files.len());
    let mut extract_errors = 0;

    for file in &files {
        match extractor.extract(file).await {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                extract_errors += 1;
                println!("[!] 추출 실패: {:?} ({:#})", file.path, e);
            }
        }
    }

    println!("[*] 인덱싱 중: {} 문서...", documents.len());
    let service = open_service(config).await?;
    let report = service
        .index_documents(documents)
        .await
        .context("인덱싱 실패")?;

    for (id, error) in &report.errors {
        println!("[!] {}: {}", id, error);
    }

    println!();
    println!(
        "[OK] 완료: 인덱싱 {}, 변경 없음 {}, 건너뜀 {}, 실패 {}",
        report.indexed,
        report.unchanged,
        report.skipped,
        report.failed + extract_errors
    );
    println!(
        "     청크: fine {}, coarse {}",
        report.fine_chunks, report.coarse_chunks
    );

    service.close();
    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    config: RagConfig,
    query: &str,
    limit: usize,
    granularity: &str,
    alpha: Option<f32>,
    json: bool,
) -> Result<()> {
    let Some(granularity) = GranularityHint::parse(granularity) else {
        bail!("세분도는 auto, fine, coarse, both 중 하나여야 합니다: {}", granularity);
    };
    if let Some(alpha) = alpha {
        if !(0.0..=1.0).contains(&alpha) {
            bail!("alpha는 0.0 ~ 1.0 범위여야 합니다: {}", alpha);
        }
    }

    let service = open_service(config).await?;
    let mut request = Query::new(query, limit).with_granularity(granularity);
    request.alpha = alpha;

    let result = service.search(&request).await.context("검색 실패")?;

    if json {
        let evidence = result.to_evidence(MAX_CONTEXT_CHARS);
        println!("{}", serde_json::to_string_pretty(&evidence)?);
        return Ok(());
    }

    println!("[*] 검색: \"{}\"", query);
    println!(
        "    세분도: {} (신뢰도 {:.2}), {:.1}ms",
        result.selection, result.route_confidence, result.latency_ms
    );
    if result.degraded {
        let engines: Vec<String> = result
            .timed_out_engines
            .iter()
            .map(|e| e.to_string())
            .collect();
        println!("[!] 일부 엔진 결과 없음: {}", engines.join(", "));
    }

    if result.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", result.len());

    for item in &result.items {
        println!(
            "[{}] [{}] [점수: {:.4}] {}",
            item.citation,
            item.granularity,
            item.score,
            item.title()
        );
        println!("    문서: {} ({})", item.doc_id, item.source_type);
        if let Some(ref sender) = item.metadata.sender {
            println!("    발신: {}", sender);
        }
        println!("    내용: {}", truncate_text(&item.text, 200));
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(config: RagConfig, limit: usize) -> Result<()> {
    let service = open_service(config).await?;
    let docs = service.list_documents(limit).context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 인덱싱된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 인덱싱된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let title = truncate_text(&doc.metadata.display_title(&doc.id), 50);
        let tag = match doc.source_type {
            SourceType::Email => "MAIL",
            SourceType::Pdf => "PDF",
        };

        println!("  [{}] {}", tag, title);
        println!("        ID: {}", doc.id);
        println!(
            "        {} | {} chars",
            doc.indexed_at.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 문서 청크 보기 (show)
async fn cmd_show(config: RagConfig, id: &str, limit: usize) -> Result<()> {
    let service = open_service(config).await?;
    let result = service.chunks_for_document(id, limit)?;

    if result.is_empty() {
        bail!("ID '{}'인 문서를 찾을 수 없습니다", id);
    }

    for item in &result.items {
        println!(
            "[{}] [{}] {}..{}",
            item.citation, item.granularity, item.start, item.end
        );
        println!("    {}", truncate_text(&item.text, 300));
        println!();
    }
    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: RagConfig, id: &str) -> Result<()> {
    let service = open_service(config).await?;
    let removed = service.delete_document(id).await.context("문서 삭제 실패")?;

    if removed > 0 {
        println!("[OK] 문서 '{}' 삭제됨 ({} 청크)", id, removed);
    } else {
        println!("[!] 삭제할 문서를 찾을 수 없습니다: {}", id);
    }
    Ok(())
}

/// 재인덱싱 명령어 (reindex)
async fn cmd_reindex(config: RagConfig, limit: Option<usize>) -> Result<()> {
    let service = open_service(config).await?;
    println!("[*] 재인덱싱 중...");

    let report = service.reindex(limit).await.context("재인덱싱 실패")?;
    println!(
        "[OK] 완료: 인덱싱 {}, 건너뜀 {}, 실패 {}",
        report.indexed, report.skipped, report.failed
    );
    Ok(())
}

/// 전체 삭제 명령어 (clear)
async fn cmd_clear(config: RagConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("인덱스 전체가 삭제됩니다. 계속하려면 --yes를 지정하세요");
    }

    let service = open_service(config).await?;
    service.clear_index().await.context("인덱스 삭제 실패")?;
    println!("[OK] 인덱스를 비웠습니다");
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("mailrag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {:?} ({}차원)",
        config.embedding.provider, config.embedding.dimension
    );

    let service = match open_service(config).await {
        Ok(service) => service,
        Err(e) => {
            println!("[!] 인덱스 열기 실패: {:#}", e);
            return Ok(());
        }
    };

    let stats = service.get_index_stats()?;
    println!("[OK] 문서: {} 건", stats.document_count);
    println!(
        "     청크: fine {}, coarse {}",
        stats.fine_chunk_total, stats.coarse_chunk_total
    );
    for (source_type, totals) in &stats.per_source_type_totals {
        println!(
            "     {}: 문서 {}, fine {}, coarse {}",
            source_type, totals.documents, totals.fine_chunks, totals.coarse_chunks
        );
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::parse_from([
            "mailrag",
            "--data-dir",
            "/tmp/mr",
            "query",
            "remote work policy",
            "-g",
            "fine",
            "-a",
            "0.5",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/mr")));
        match cli.command {
            Commands::Query {
                query,
                granularity,
                alpha,
                limit,
                ..
            } => {
                assert_eq!(query, "remote work policy");
                assert_eq!(granularity, "fine");
                assert_eq!(alpha, Some(0.5));
                assert_eq!(limit, 5);
            }
            _ => panic!("expected query command"),
        }
    }

    #[tokio::test]
    async fn test_ingest_and_status_on_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir(&inbox).unwrap();
        std::fs::write(
            inbox.join("policy.eml"),
            "Subject: Remote work\nFrom: hr@corp.com\n\nRemote work permitted 3 days/week.",
        )
        .unwrap();

        let mut config = RagConfig::with_data_dir(dir.path().join("data"));
        config.embedding.dimension = 64;

        cmd_ingest(config.clone(), inbox, false).await.unwrap();
        let service = open_service(config).await.unwrap();
        assert_eq!(service.get_index_stats().unwrap().document_count, 1);
    }
}
