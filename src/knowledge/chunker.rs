//! Text Chunking Module
//!
//! 고정 크기 윈도우를 `chunk_size - chunk_overlap` 간격으로 이동하며 텍스트를 분할합니다.
//! 윈도우 끝 근처에 문단/줄/문장 경계가 있으면 그 위치에서 자릅니다.
//! 길이 단위는 바이트가 아닌 문자(char)입니다.

use serde_json::Value;

use crate::error::{KnowledgeError, KnowledgeResult};

use super::document::{Chunk, RawDocument};

/// 기본 청크 크기 (문자 수)
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// 기본 오버랩 (문자 수)
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;

/// 문장 종결 문자 (뒤에 공백이 와야 경계로 인정)
const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];
/// 전각 문장 종결 문자 (공백 없이 경계로 인정)
const WIDE_TERMINATORS: [char; 3] = ['。', '！', '？'];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 (문자 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> KnowledgeResult<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// 크기/오버랩 검증
    pub fn validate(&self) -> KnowledgeResult<()> {
        if self.chunk_size == 0 {
            return Err(KnowledgeError::config("chunk_size must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(KnowledgeError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// 경계 탐색 범위 (윈도우 끝에서 뒤로)
    fn lookback(&self) -> usize {
        (self.chunk_size / 5).max(1)
    }
}

// ============================================================================
// TextChunker
// ============================================================================

/// 오버랩 윈도우 청커
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    config: ChunkConfig,
}

impl TextChunker {
    /// 설정으로 생성 (검증 실패 시 ConfigurationError)
    pub fn new(config: ChunkConfig) -> KnowledgeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// 텍스트를 (시작 offset, 청크 텍스트) 목록으로 분할
    pub fn split_windows(&self, text: &str) -> Vec<(usize, String)> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return vec![];
        }

        let ChunkConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;

        let mut windows = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = (start + chunk_size).min(total);
            if hard_end == total {
                windows.push((start, chars[start..total].iter().collect()));
                break;
            }

            // 다음 윈도우가 앞으로 진행하려면 end > start + overlap
            let floor = hard_end
                .saturating_sub(self.config.lookback())
                .max(start + chunk_overlap + 1);
            let end = find_break(&chars, floor, hard_end).unwrap_or(hard_end);

            windows.push((start, chars[start..end].iter().collect()));
            start = end - chunk_overlap;
        }

        windows
    }

    /// 텍스트를 청크로 분할 (offset, chunk_index 메타데이터 포함)
    pub fn split_text(&self, text: &str) -> Vec<Chunk> {
        self.split_windows(text)
            .into_iter()
            .enumerate()
            .map(|(index, (offset, content))| {
                Chunk::new(content)
                    .with_metadata("chunk_index", index)
                    .with_metadata("offset", offset)
            })
            .collect()
    }

    /// 문서 메타데이터를 상속하여 분할
    pub fn split_document(&self, doc: &RawDocument) -> Vec<Chunk> {
        self.split_text(&doc.content)
            .into_iter()
            .map(|mut chunk| {
                for (key, value) in &doc.metadata {
                    chunk
                        .metadata
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                chunk
            })
            .collect()
    }

    /// 여러 문서 분할
    pub fn split_documents(&self, docs: &[RawDocument]) -> Vec<Chunk> {
        docs.iter().flat_map(|d| self.split_document(d)).collect()
    }
}

/// 텍스트 청킹
///
/// # Arguments
/// * `text` - 분할할 텍스트
/// * `chunk_size` - 청크 당 최대 문자 수
/// * `chunk_overlap` - 인접 청크 간 중첩 문자 수
///
/// # Returns
/// 순서가 보존된 청크 목록. `chunk_overlap >= chunk_size` 또는 `chunk_size == 0`이면 에러
pub fn chunk(text: &str, chunk_size: usize, chunk_overlap: usize) -> KnowledgeResult<Vec<Chunk>> {
    let chunker = TextChunker::new(ChunkConfig {
        chunk_size,
        chunk_overlap,
    })?;
    Ok(chunker.split_text(text))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `(floor..=hard_end)` 범위에서 자를 위치 탐색
///
/// 우선순위: 문단(빈 줄) > 줄바꿈 > 문장 끝. 같은 종류면 뒤쪽 위치 우선.
fn find_break(chars: &[char], floor: usize, hard_end: usize) -> Option<usize> {
    if floor > hard_end || hard_end < 2 {
        return None;
    }

    let candidates = || (floor.max(2)..=hard_end).rev();

    let paragraph = candidates().find(|&p| chars[p - 1] == '\n' && chars[p - 2] == '\n');
    if paragraph.is_some() {
        return paragraph;
    }

    let line = candidates().find(|&p| chars[p - 1] == '\n');
    if line.is_some() {
        return line;
    }

    candidates().find(|&p| {
        WIDE_TERMINATORS.contains(&chars[p - 1])
            || (chars[p - 1].is_whitespace() && SENTENCE_TERMINATORS.contains(&chars[p - 2]))
    })
}

/// 청크 메타데이터의 offset 조회
pub fn chunk_offset(chunk: &Chunk) -> Option<usize> {
    chunk
        .metadata
        .get("offset")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, c) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&c.content);
            } else {
                out.extend(c.content.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_chunk_example_windows() {
        let chunks = chunk("ABCDEFGHIJ", 4, 1).unwrap();
        assert_eq!(contents(&chunks), vec!["ABCD", "DEFG", "GHIJ"]);
    }

    #[test]
    fn test_chunk_empty() {
        assert!(chunk("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_shorter_than_window() {
        let chunks = chunk("short", 10, 2).unwrap();
        assert_eq!(contents(&chunks), vec!["short"]);
    }

    #[test]
    fn test_chunk_no_overlap_trailing_remainder() {
        let chunks = chunk("ABCDEFGHIJ", 4, 0).unwrap();
        assert_eq!(contents(&chunks), vec!["ABCD", "EFGH", "IJ"]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            chunk("abc", 4, 4),
            Err(KnowledgeError::Configuration(_))
        ));
        assert!(matches!(
            chunk("abc", 4, 9),
            Err(KnowledgeError::Configuration(_))
        ));
        assert!(matches!(
            chunk("abc", 0, 0),
            Err(KnowledgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a".repeat(15), "b".repeat(10));
        let chunks = chunk(&text, 20, 0).unwrap();
        assert_eq!(chunks[0].content, format!("{}\n\n", "a".repeat(15)));
        assert_eq!(chunks[1].content, "b".repeat(10));
    }

    #[test]
    fn test_prefers_sentence_break() {
        let chunks = chunk("Hello world. This is a test sentence", 15, 0).unwrap();
        assert_eq!(chunks[0].content, "Hello world. ");
        assert_eq!(reassemble(&chunks, 0), "Hello world. This is a test sentence");
    }

    #[test]
    fn test_size_overlap_and_reassembly_properties() {
        let text = "Rust is a systems language.\nIt is fast! Is it safe? Yes.\n\n\
                    Ownership rules the memory model. 러스트는 안전합니다。 끝."
            .repeat(7);

        for (size, overlap) in [(10, 0), (10, 3), (37, 5), (64, 20), (200, 199)] {
            let chunks = chunk(&text, size, overlap).unwrap();
            assert!(!chunks.is_empty());

            for c in &chunks[..chunks.len() - 1] {
                assert!(c.content.chars().count() <= size);
            }

            for pair in chunks.windows(2) {
                let prev: Vec<char> = pair[0].content.chars().collect();
                let next: Vec<char> = pair[1].content.chars().collect();
                assert!(prev.len() >= overlap);
                assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
            }

            assert_eq!(reassemble(&chunks, overlap), text);
        }
    }

    #[test]
    fn test_multibyte_characters() {
        let chunks = chunk("가나다라마바사", 3, 1).unwrap();
        assert_eq!(contents(&chunks), vec!["가나다", "다라마", "마바사"]);
    }

    #[test]
    fn test_offsets_and_indices() {
        let chunks = chunk("ABCDEFGHIJ", 4, 1).unwrap();
        let offsets: Vec<_> = chunks.iter().filter_map(chunk_offset).collect();
        assert_eq!(offsets, vec![0, 3, 6]);
        assert_eq!(chunks[2].metadata["chunk_index"], 2);
    }

    #[test]
    fn test_split_document_inherits_metadata() {
        let chunker = TextChunker::new(ChunkConfig::new(4, 0).unwrap()).unwrap();
        let doc = RawDocument::new("ABCDEFGH").with_metadata("source", "notes.txt");

        let chunks = chunker.split_document(&doc);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.source() == Some("notes.txt")));
        assert_eq!(chunks[1].metadata["offset"], 4);
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 0);
        assert!(config.validate().is_ok());
    }
}
