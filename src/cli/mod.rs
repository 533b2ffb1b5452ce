//! CLI 모듈
//!
//! palank-knowledge CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chain::ChainMode;
use crate::chat::{ConversationContext, KnowledgeChat, PromptVariables, KNOWLEDGE_PROMPT_KEY};
use crate::collector::{CollectionStats, FileCollector};
use crate::config::{KnowledgeConfigService, KnowledgeSettings};
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::gemini::{has_api_key, GeminiClient};
use crate::knowledge::{Chunk, KnowledgeSelection, KnowledgeService, KnowledgeStore};
use crate::llm::{ChatMessage, ChatModelFactory, GeminiModelFactory, ModelRef};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-knowledge")]
#[command(version, about = "대화형 지식베이스 검색", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 지식베이스에 추가
    Ingest {
        /// 지식베이스 이름
        #[arg(short, long)]
        name: String,

        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 지식베이스 이름 정규식 (없으면 기본 지식베이스)
        #[arg(short, long)]
        knowledge: Option<String>,

        /// 검색 체인 모드 (default, regenerate, contextual-compression)
        #[arg(short, long)]
        mode: Option<ChainMode>,

        /// 결과 개수 제한
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 지식베이스를 참조하는 대화형 채팅
    Chat {
        /// 지식베이스 이름 정규식 (없으면 기본 지식베이스)
        #[arg(short, long)]
        knowledge: Option<String>,
    },

    /// 등록된 지식베이스 목록
    List,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { name, file, dir } => cmd_ingest(&name, file, dir).await,
        Commands::Query {
            query,
            knowledge,
            mode,
            limit,
        } => cmd_query(&query, knowledge, mode, limit).await,
        Commands::Chat { knowledge } => cmd_chat(knowledge).await,
        Commands::List => cmd_list().await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// 설정 + 프로파일 로드
fn load_configs() -> Result<KnowledgeConfigService> {
    let settings = KnowledgeSettings::load_default().context("설정 로드 실패")?;
    let mut configs = KnowledgeConfigService::new(settings);
    configs.load_all_config().context("프로파일 로드 실패")?;
    Ok(configs)
}

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 지식베이스 서비스 생성 (Gemini 임베딩)
fn open_service(configs: KnowledgeConfigService) -> Result<Arc<KnowledgeService>> {
    require_api_key()?;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(create_embedder().context("임베딩 프로바이더 생성 실패")?);
    let service = KnowledgeService::open(configs, embedder).context("KnowledgeService 열기 실패")?;
    Ok(Arc::new(service))
}

fn model_factory() -> Result<Arc<dyn ChatModelFactory>> {
    let client = GeminiClient::from_env().context("Gemini 클라이언트 생성 실패")?;
    Ok(Arc::new(GeminiModelFactory::new(client)))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
async fn cmd_ingest(name: &str, file: Option<PathBuf>, dir: Option<PathBuf>) -> Result<()> {
    let path = match (file, dir) {
        (Some(file), None) => file,
        (None, Some(dir)) => dir,
        _ => bail!("--file 또는 --dir 중 하나를 지정해야 합니다"),
    };

    let service = open_service(load_configs()?)?;

    if path.is_dir() {
        let files = FileCollector::with_defaults(service.loaders().clone()).collect_directory(&path)?;
        if files.is_empty() {
            println!("[!] 수집할 파일이 없습니다.");
            return Ok(());
        }

        let stats = CollectionStats::from_files(&files);
        println!("[*] 수집 대상: {} 파일", stats.total_files);
        for (loader, count) in &stats.by_loader {
            println!("    {}: {}", loader, count);
        }
        println!("    총 크기: {}", format_bytes(stats.total_size as usize));
        println!();
    }

    println!("[*] '{}'에 문서 저장 및 임베딩 생성 중...", name);
    let report = service
        .ingest(&path, name)
        .await
        .with_context(|| format!("{:?} 수집 실패", path))?;

    println!(
        "[OK] 완료: 파일 {}, 문서 {}, 청크 {} (건너뜀 {})",
        report.files, report.documents, report.chunks, report.skipped
    );
    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    query: &str,
    knowledge: Option<String>,
    mode: Option<ChainMode>,
    limit: Option<usize>,
) -> Result<()> {
    let mut configs = load_configs()?;

    if let Some(limit) = limit {
        let mut settings = configs.settings().clone();
        settings.top_k = limit;
        configs.set_settings(settings)?;
    }
    if let Some(mode) = mode {
        // 활성 프로파일의 모드를 덮어씀
        let mut profile = configs.active_profile();
        profile.mode = mode;
        configs.insert(profile)?;
    }

    let service = open_service(configs)?;
    let chat = KnowledgeChat::new(service, model_factory()?);
    let ctx = conversation("cli-query", knowledge);

    println!("[*] 검색 중: \"{}\"", query);
    let chunks = chat.search(&ctx, query, &[]).await.context("검색 실패")?;

    if chunks.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        print_chunk(i + 1, chunk);
    }

    Ok(())
}

/// 대화형 채팅 명령어 (chat)
///
/// `/clear`는 히스토리 초기화, `/exit`는 종료입니다.
async fn cmd_chat(knowledge: Option<String>) -> Result<()> {
    let configs = load_configs()?;
    let answer_model = configs.settings().model.clone();

    let service = open_service(configs)?;
    let models = model_factory()?;
    let chat = KnowledgeChat::new(service, models.clone());

    let answerer = match answer_model {
        Some(raw) => Some(models.create_chat_model(&ModelRef::parse(&raw)?).await?),
        None => {
            println!("[!] model이 설정되지 않아 검색 결과만 표시합니다.");
            None
        }
    };

    let ctx = conversation(&uuid::Uuid::new_v4().to_string(), knowledge);
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("[*] 대화 시작 (/clear: 히스토리 초기화, /exit: 종료)");

    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        match message {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                chat.on_history_cleared(Some(ctx.conversation_id.as_str())).await;
                history.clear();
                println!("[OK] 히스토리를 초기화했습니다.");
                continue;
            }
            _ => {}
        }

        let mut variables = PromptVariables::new();
        if let Err(e) = chat.before_chat(&ctx, message, &history, &mut variables).await {
            println!("[!] 지식 검색 실패: {:#}", e);
            continue;
        }

        let documents: Vec<Chunk> = match variables.remove(KNOWLEDGE_PROMPT_KEY) {
            Some(value) => serde_json::from_value(value).context("검색 결과 해석 실패")?,
            None => Vec::new(),
        };

        let Some(model) = &answerer else {
            for (i, chunk) in documents.iter().enumerate() {
                print_chunk(i + 1, chunk);
            }
            continue;
        };

        let prompt = answer_prompt(message, &history, &documents);
        match model.generate(&prompt).await {
            Ok(answer) => {
                println!("{}\n", answer.trim());
                history.push(ChatMessage::human(message));
                history.push(ChatMessage::ai(answer.trim()));
            }
            Err(e) => println!("[!] 응답 생성 실패: {:#}", e),
        }
    }

    chat.on_conversation_disposed(&ctx.conversation_id).await;
    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list() -> Result<()> {
    let configs = load_configs()?;
    let store = KnowledgeStore::open(&configs.settings().data_dir().join("knowledge.db"))
        .context("KnowledgeStore 열기 실패")?;

    let records = store.list().context("지식베이스 목록 조회 실패")?;
    if records.is_empty() {
        println!("[!] 등록된 지식베이스가 없습니다.");
        return Ok(());
    }

    println!("[OK] 등록된 지식베이스 ({} 건):\n", records.len());
    for record in records {
        println!("  {} [{}]", record.config.name, record.config.vector_storage);
        println!("        경로: {}", record.config.path);
        println!("        {}", record.created_at.format("%Y-%m-%d %H:%M"));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("palank-knowledge v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let configs = load_configs()?;
    let settings = configs.settings();
    let profile = configs.active_profile();

    println!("[*] 데이터 디렉토리: {}", settings.data_dir().display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    println!(
        "[*] 프로파일: {} (mode: {}, 청크: {}/{}, 최소 유사도: {})",
        profile.name,
        profile.mode,
        profile.chunk_size,
        profile.chunk_overlap,
        profile.min_similarity_score
    );
    println!(
        "[*] 스토어: {}, top_k: {}, 모델: {}",
        settings.vector_store,
        settings.top_k,
        profile
            .model
            .as_deref()
            .or(settings.model.as_deref())
            .unwrap_or("-")
    );
    if !configs.names().is_empty() {
        println!("[*] 로드된 프로파일: {}", configs.names().join(", "));
    }

    match KnowledgeStore::open(&settings.data_dir().join("knowledge.db")) {
        Ok(store) => match store.stats() {
            Ok(stats) => println!("[OK] 지식베이스: {} 건", stats.knowledge_count),
            Err(e) => println!("[!] 통계 조회 실패: {}", e),
        },
        Err(e) => println!("[!] KnowledgeStore 열기 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn conversation(id: &str, knowledge: Option<String>) -> ConversationContext {
    let ctx = ConversationContext::new(id);
    match knowledge {
        Some(pattern) => ctx.with_selection(KnowledgeSelection::Pattern(pattern)),
        None => ctx,
    }
}

fn print_chunk(index: usize, chunk: &Chunk) {
    let score = chunk
        .metadata
        .get("score")
        .and_then(|v| v.as_f64())
        .unwrap_or_default();
    let store = chunk
        .metadata
        .get("source_store")
        .and_then(|v| v.as_str())
        .unwrap_or("-");

    println!("{}. [점수: {:.4}] [{}]", index, score, store);
    if let Some(source) = chunk.source() {
        println!("   출처: {}", source);
    }
    println!("   내용: {}", truncate_text(&chunk.content, 200));
    println!();
}

/// 답변 생성 프롬프트
fn answer_prompt(message: &str, history: &[ChatMessage], documents: &[Chunk]) -> String {
    let knowledge = documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the user using the knowledge below when it is relevant.\n\n\
         Knowledge:\n{}\n\n\
         Conversation:\n{}\n\n\
         Human: {}\nAssistant:",
        if knowledge.is_empty() { "(none)" } else { knowledge.as_str() },
        crate::llm::format_history(history),
        message
    )
}

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
