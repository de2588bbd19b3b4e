//! Text chunking module
//!
//! Splits extracted book text into embedding-sized chunks in two stages:
//! 1. short lines, cut at semantic boundaries by `text-splitter`
//! 2. paragraphs, built greedily from consecutive lines, each starting with a
//!    little trailing context from the previous one

use crate::errors::IngestionError;
use scribe_common::config::IngestionConfig;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Rough approximation: ~4 chars per token
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Configuration for text chunking, in estimated tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_tokens_per_line: usize,
    pub max_tokens_per_paragraph: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_line: 128,
            max_tokens_per_paragraph: 1024,
            overlap_tokens: 64,
        }
    }
}

impl ChunkingConfig {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            max_tokens_per_line: config.max_tokens_per_line,
            max_tokens_per_paragraph: config.max_tokens_per_paragraph,
            overlap_tokens: config.overlap_tokens,
        }
    }

    pub fn validate(&self) -> Result<(), IngestionError> {
        if self.max_tokens_per_line == 0 || self.max_tokens_per_paragraph == 0 {
            return Err(IngestionError::Chunking(
                "chunk sizes must be positive".to_string(),
            ));
        }
        if self.max_tokens_per_line > self.max_tokens_per_paragraph {
            return Err(IngestionError::Chunking(format!(
                "line size {} exceeds paragraph size {}",
                self.max_tokens_per_line, self.max_tokens_per_paragraph
            )));
        }
        if self.overlap_tokens >= self.max_tokens_per_paragraph {
            return Err(IngestionError::Chunking(format!(
                "overlap {} must be smaller than paragraph size {}",
                self.overlap_tokens, self.max_tokens_per_paragraph
            )));
        }
        Ok(())
    }
}

/// A text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Index of this chunk in the book, dense from 0
    pub index: usize,
    /// The chunk content
    pub content: String,
    /// Approximate token count
    pub token_count: usize,
}

/// Split text into lines of at most `max_tokens_per_line`
pub fn split_lines<'a>(text: &'a str, config: &ChunkingConfig) -> Vec<&'a str> {
    let splitter = TextSplitter::new(ChunkConfig::new(
        config.max_tokens_per_line * CHARS_PER_TOKEN,
    ));

    splitter
        .chunks(text)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Split text into overlapping paragraph chunks for embedding.
///
/// Same text and config always yield the same chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let lines = split_lines(text, config);
    let paragraph_cap = config.max_tokens_per_paragraph * CHARS_PER_TOKEN;
    let overlap_cap = config.overlap_tokens * CHARS_PER_TOKEN;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    // Lines in `current` not already emitted as part of a previous paragraph
    let mut fresh = 0usize;

    for line in lines {
        let line_len = line.chars().count();

        if fresh > 0 && joined_len(&current) + 1 + line_len > paragraph_cap {
            paragraphs.push(current.join("\n"));
            current = trailing_overlap(&current, overlap_cap);
            fresh = 0;
        }

        // Trim carried context until the new line fits
        while !current.is_empty() && joined_len(&current) + 1 + line_len > paragraph_cap {
            current.remove(0);
        }

        current.push(line);
        fresh += 1;
    }

    if fresh > 0 {
        paragraphs.push(current.join("\n"));
    }

    let chunks: Vec<TextChunk> = paragraphs
        .into_iter()
        .enumerate()
        .map(|(index, content)| TextChunk {
            index,
            token_count: estimate_tokens(&content),
            content,
        })
        .collect();

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        max_tokens_per_paragraph = config.max_tokens_per_paragraph,
        "Text chunked"
    );

    chunks
}

/// Length in chars of `lines` joined with single newlines
fn joined_len(lines: &[&str]) -> usize {
    if lines.is_empty() {
        return 0;
    }
    lines.iter().map(|l| l.chars().count()).sum::<usize>() + lines.len() - 1
}

/// Trailing lines whose joined length fits in `cap`, never the whole paragraph
fn trailing_overlap<'a>(lines: &[&'a str], cap: usize) -> Vec<&'a str> {
    let mut taken = 0;
    for n in 1..lines.len() {
        if joined_len(&lines[lines.len() - n..]) > cap {
            break;
        }
        taken = n;
    }
    lines[lines.len() - taken..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ChunkingConfig {
        ChunkingConfig {
            max_tokens_per_line: 8,
            max_tokens_per_paragraph: 24,
            overlap_tokens: 8,
        }
    }

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {:02} is here.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", &ChunkingConfig::default()).is_empty());
        assert!(chunk_text("  \n\t \n", &ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello world.", &ChunkingConfig::default());
        assert_eq!(
            chunks,
            vec![TextChunk {
                index: 0,
                content: "Hello world.".to_string(),
                token_count: 3,
            }]
        );
    }

    #[test]
    fn test_chunks_respect_limits_and_are_dense() {
        let config = small();
        let chunks = chunk_text(&sentences(40), &config);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.token_count <= config.max_tokens_per_paragraph);
            assert!(!chunk.content.is_empty());
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = chunk_text(&sentences(40), &small());

        for pair in chunks.windows(2) {
            let last_line = pair[0].content.lines().last().unwrap();
            assert!(
                pair[1].content.starts_with(last_line),
                "{:?} should start with {:?}",
                pair[1].content,
                last_line
            );
        }
    }

    #[test]
    fn test_without_overlap_every_line_appears_once() {
        let config = ChunkingConfig {
            overlap_tokens: 0,
            ..small()
        };
        let text = sentences(25);

        let chunks = chunk_text(&text, &config);
        let rebuilt: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.content.lines().map(str::to_string))
            .collect();
        let lines: Vec<String> = split_lines(&text, &config)
            .into_iter()
            .map(str::to_string)
            .collect();

        assert_eq!(rebuilt, lines);
    }

    #[test]
    fn test_deterministic() {
        let text = sentences(60);
        assert_eq!(chunk_text(&text, &small()), chunk_text(&text, &small()));
    }

    #[test]
    fn test_trailing_overlap() {
        let lines = ["aaaa", "bbbb", "cccc"];
        assert_eq!(trailing_overlap(&lines, 4), vec!["cccc"]);
        assert_eq!(trailing_overlap(&lines, 9), vec!["bbbb", "cccc"]);
        // Never the whole paragraph
        assert_eq!(trailing_overlap(&lines, 100), vec!["bbbb", "cccc"]);
        assert!(trailing_overlap(&lines, 0).is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(ChunkingConfig::default().validate().is_ok());

        let overlap_too_big = ChunkingConfig {
            overlap_tokens: 1024,
            ..Default::default()
        };
        assert!(overlap_too_big.validate().is_err());

        let line_too_big = ChunkingConfig {
            max_tokens_per_line: 2048,
            ..Default::default()
        };
        assert!(line_too_big.validate().is_err());

        let zero = ChunkingConfig {
            max_tokens_per_line: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
