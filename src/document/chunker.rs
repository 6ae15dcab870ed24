//! The Chunker (SPEC_FULL.md §4.B): splits sanitized page text — optionally
//! merged with vision descriptions of that page's images — into chunks of
//! bounded size. Three strategies share a fixed-size-with-boundary-preference
//! primitive; callers reindex across the whole document afterward so
//! `chunk_index` stays dense regardless of how many pieces each page yields.

use crate::models::ContentKind;
use crate::utils::token_estimator::estimate_tokens;

const VISION_BEGIN: &str = "--- Visual Content on This Page ---";
const VISION_END: &str = "--- End Visual Content ---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    FixedSize,
    Paragraph,
    Semantic,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub page_number: Option<i32>,
    pub content: String,
    pub content_kind: ContentKind,
}

pub struct Chunker;

impl Chunker {
    pub fn chunk_page(
        page_number: i32,
        text: &str,
        vision_descriptions: &[String],
        strategy: ChunkStrategy,
        config: &ChunkerConfig,
    ) -> Vec<RawChunk> {
        let merged = Self::merge_vision(text, vision_descriptions);
        if merged.trim().is_empty() {
            return Vec::new();
        }

        let kind = if text.trim().is_empty() && !vision_descriptions.is_empty() {
            ContentKind::Vision
        } else if !vision_descriptions.is_empty() {
            ContentKind::Merged
        } else {
            ContentKind::Text
        };

        let pieces = match strategy {
            ChunkStrategy::FixedSize => Self::split_fixed_size(&merged, config),
            ChunkStrategy::Paragraph => Self::split_paragraphs(&merged, config),
            ChunkStrategy::Semantic => Self::split_semantic(&merged, config),
        };

        pieces
            .into_iter()
            .map(|content| RawChunk { page_number: Some(page_number), content, content_kind: kind })
            .collect()
    }

    fn merge_vision(text: &str, vision_descriptions: &[String]) -> String {
        if vision_descriptions.is_empty() {
            return text.to_string();
        }

        let mut out = String::new();
        out.push_str(text.trim_end());
        out.push_str("\n\n");
        out.push_str(VISION_BEGIN);
        out.push('\n');
        for (i, desc) in vision_descriptions.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(desc.trim());
        }
        out.push('\n');
        out.push_str(VISION_END);
        out
    }

    /// Fixed-size windows with sentence-boundary preference: within the
    /// trailing 20% of each window, cut at the last occurrence of a sentence
    /// terminator (`. `, `.\n`, `? `, `?\n`, `! `, `!\n`); fall back to a hard
    /// cut at `chunk_size` when none is found.
    fn split_fixed_size(text: &str, config: &ChunkerConfig) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        if len == 0 {
            return Vec::new();
        }

        let size = config.chunk_size.max(1);
        let overlap = config.chunk_overlap.min(size.saturating_sub(1));

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = (start + size).min(len);

            if end < len {
                let window_start = start + ((end - start) * 80 / 100);
                if let Some(cut) = Self::last_sentence_boundary(&chars, window_start, end) {
                    end = cut;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= len {
                break;
            }
            start = end.saturating_sub(overlap).max(start + 1);
        }

        chunks
    }

    fn last_sentence_boundary(chars: &[char], window_start: usize, end: usize) -> Option<usize> {
        const TERMINATORS: [(char, char); 6] =
            [('.', ' '), ('.', '\n'), ('?', ' '), ('?', '\n'), ('!', ' '), ('!', '\n')];

        let mut best = None;
        let mut i = window_start;
        while i + 1 < end {
            if TERMINATORS.contains(&(chars[i], chars[i + 1])) {
                best = Some(i + 2);
            }
            i += 1;
        }
        best
    }

    fn split_paragraphs(text: &str, config: &ChunkerConfig) -> Vec<String> {
        let paragraphs: Vec<&str> =
            text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).collect();

        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in paragraphs {
            if !current.is_empty() && current.chars().count() + para.chars().count() > config.chunk_size {
                chunks.push(current.trim().to_string());
                current.clear();
            }

            if para.chars().count() > config.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current.clear();
                }
                chunks.extend(Self::split_fixed_size(para, config));
                continue;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }

        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    /// Splits on Markdown-style ATX headers first, falling back to
    /// paragraph splitting inside any section that still exceeds
    /// `chunk_size`.
    fn split_semantic(text: &str, config: &ChunkerConfig) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current = String::new();

        for line in text.lines() {
            if Self::is_header_line(line) && !current.trim().is_empty() {
                sections.push(current.clone());
                current.clear();
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            sections.push(current);
        }

        let mut chunks = Vec::new();
        for section in sections {
            if section.chars().count() > config.chunk_size {
                chunks.extend(Self::split_paragraphs(&section, config));
            } else {
                let trimmed = section.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            }
        }
        chunks
    }

    fn is_header_line(line: &str) -> bool {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|&c| c == '#').count();
        hashes > 0 && hashes <= 6 && trimmed.as_bytes().get(hashes) == Some(&b' ')
    }

    /// Assigns dense, zero-based `chunk_index` values across every RawChunk
    /// collected for a document, in emission order.
    pub fn reindex(raw: Vec<RawChunk>) -> Vec<(i32, RawChunk)> {
        raw.into_iter().enumerate().map(|(i, chunk)| (i as i32, chunk)).collect()
    }

    pub fn token_count(content: &str) -> i32 {
        estimate_tokens(content) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkerConfig {
        ChunkerConfig { chunk_size: 40, chunk_overlap: 8 }
    }

    #[test]
    fn fixed_size_prefers_sentence_boundary() {
        let text = "This is sentence one. This is sentence two. This is sentence three.";
        let pieces = Chunker::split_fixed_size(text, &cfg());
        assert!(pieces.len() > 1);
        assert!(pieces[0].ends_with('.'));
    }

    #[test]
    fn fixed_size_makes_progress_with_no_boundary() {
        let text = "a".repeat(200);
        let pieces = Chunker::split_fixed_size(&text, &cfg());
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn reindex_is_dense_and_zero_based() {
        let raw = vec![
            RawChunk { page_number: Some(1), content: "a".into(), content_kind: ContentKind::Text },
            RawChunk { page_number: Some(2), content: "b".into(), content_kind: ContentKind::Text },
        ];
        let indexed = Chunker::reindex(raw);
        assert_eq!(indexed.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn merge_vision_wraps_with_markers() {
        let merged = Chunker::merge_vision("page text", &["a chart showing sales".to_string()]);
        assert!(merged.contains(VISION_BEGIN));
        assert!(merged.contains(VISION_END));
        assert!(merged.contains("a chart showing sales"));
    }

    #[test]
    fn vision_only_page_is_tagged_vision_kind() {
        let chunks =
            Chunker::chunk_page(1, "", &["a photo".to_string()], ChunkStrategy::FixedSize, &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_kind, ContentKind::Vision);
    }

    #[test]
    fn semantic_splits_on_headers() {
        let text = "# Intro\nsome short text\n# Details\nmore short text";
        let pieces = Chunker::split_semantic(text, &cfg());
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].starts_with("# Intro"));
        assert!(pieces[1].starts_with("# Details"));
    }
}
