//! Heading-aware hybrid chunker.
//!
//! Splits a [`Document`] into ordered [`Chunk`]s that carry their full
//! heading lineage and exact byte offsets into the source text.
//!
//! # Algorithm
//!
//! 1. Split the text into sections at ATX heading lines (`#` .. `######`),
//!    ignoring markers inside fenced code blocks. A heading stack is pushed
//!    on deeper headings and popped on same-or-shallower ones, so every
//!    section knows its lineage (e.g. `["Project X", "Risks"]`). Text before
//!    the first heading belongs to the implicit root path `[]`.
//! 2. Merge sections shorter than `min_size` characters (or blank) into the
//!    section that follows. The last section is emitted as-is.
//! 3. Split each section longer than `max_size` characters, backing off to
//!    the nearest preceding word boundary. The next piece re-reads
//!    `overlap` characters from the tail of the previous one. A single
//!    token longer than `max_size` becomes its own oversized piece.
//! 4. Derive each chunk id from `(source_path, start, end)`.
//!
//! Chunk content is always `document.content[start..end]`, so with
//! `overlap = 0` the chunks tile the document with no gaps and no overlap.
//!
//! # Example
//!
//! ```rust
//! use docvault_core::chunk::{chunk_document, ChunkingConfig};
//! use docvault_core::models::Document;
//!
//! let doc = Document::new("notes.md", "# A\nfoo bar\n## B\nbaz qux");
//! let config = ChunkingConfig { min_size: 1, max_size: 100, overlap: 0, heading_weight: 0.0 };
//! let chunks = chunk_document(&doc, &config).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].heading_path, vec!["A", "B"]);
//! ```

use uuid::Uuid;

use crate::error::{RetrievalError, RetrievalResult};
use crate::models::{Chunk, Document, SourceOffset};

/// Metadata key under which the heading weight is recorded.
pub const HEADING_WEIGHT_KEY: &str = "heading_weight";
/// Metadata key holding the chunk's position within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// Chunking parameters. Every field is required at this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingConfig {
    /// Sections shorter than this many characters merge forward.
    pub min_size: usize,
    /// Soft upper bound in characters. Never enforced by truncation.
    pub max_size: usize,
    /// Characters carried from the tail of one piece into the next.
    pub overlap: usize,
    /// Recorded in chunk metadata for the embedding/ranking stage.
    pub heading_weight: f32,
}

impl ChunkingConfig {
    pub fn validate(&self) -> RetrievalResult<()> {
        if self.max_size == 0 {
            return Err(RetrievalError::invalid("chunking max_size must be > 0"));
        }
        if self.min_size > self.max_size {
            return Err(RetrievalError::invalid(format!(
                "chunking min_size ({}) must be <= max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.overlap >= self.max_size {
            return Err(RetrievalError::invalid(format!(
                "chunking overlap ({}) must be < max_size ({})",
                self.overlap, self.max_size
            )));
        }
        if !self.heading_weight.is_finite() || self.heading_weight < 0.0 {
            return Err(RetrievalError::invalid(
                "chunking heading_weight must be a finite value >= 0",
            ));
        }
        Ok(())
    }
}

/// A heading-delimited span of the document, in byte offsets.
#[derive(Debug, Clone, PartialEq)]
struct Section {
    start: usize,
    end: usize,
    heading_path: Vec<String>,
}

/// Split a document into ordered chunks.
///
/// Returns an empty list for an empty (or whitespace-only) document.
/// Identical input and config always yield identical boundaries and ids.
///
/// # Errors
///
/// Returns [`RetrievalError::InvalidInput`] if `config` fails
/// [`ChunkingConfig::validate`].
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> RetrievalResult<Vec<Chunk>> {
    config.validate()?;

    let text = document.content.as_str();
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let sections = merge_short_sections(text, split_sections(text), config.min_size);

    let mut chunks = Vec::new();
    for section in &sections {
        for (start, end) in split_section(text, section, config.max_size, config.overlap) {
            let index = chunks.len();
            chunks.push(make_chunk(document, config, index, section, start, end));
        }
    }

    Ok(chunks)
}

/// Stable chunk id for a `(source_path, start, end)` triple.
pub fn chunk_id(source_path: &str, start: usize, end: usize) -> String {
    let name = format!("docvault:{}:{}:{}", source_path, start, end);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Split text into heading-delimited sections.
///
/// Each section starts at its heading line (or at offset 0 for the
/// preamble) and ends where the next heading line starts.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current_start = 0usize;
    let mut current_path: Vec<String> = Vec::new();
    let mut open_fence: Option<char> = None;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if let Some(fence) = fence_marker(line) {
            match open_fence {
                None => open_fence = Some(fence),
                Some(open) if open == fence => open_fence = None,
                Some(_) => {}
            }
            continue;
        }
        if open_fence.is_some() {
            continue;
        }

        let Some((level, title)) = parse_heading(line) else {
            continue;
        };

        if line_start > current_start {
            sections.push(Section {
                start: current_start,
                end: line_start,
                heading_path: current_path.clone(),
            });
        }

        while stack.last().is_some_and(|(l, _)| *l >= level) {
            stack.pop();
        }
        stack.push((level, title));
        current_path = stack.iter().map(|(_, t)| t.clone()).collect();
        current_start = line_start;
    }

    if text.len() > current_start {
        sections.push(Section {
            start: current_start,
            end: text.len(),
            heading_path: current_path,
        });
    }

    sections
}

/// Parse an ATX heading line into `(level, title)`.
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let line = line.trim_end_matches(['\n', '\r']);
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.len() - rest.trim_start_matches('#').len();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with(char::is_whitespace) {
        return None;
    }

    let title = after.trim();
    let without_closing = title.trim_end_matches('#');
    let title = if without_closing.is_empty() {
        ""
    } else if without_closing.ends_with(char::is_whitespace) {
        without_closing.trim_end()
    } else {
        title
    };

    Some((level, title.to_string()))
}

/// Returns the fence character if the line opens or closes a code fence.
fn fence_marker(line: &str) -> Option<char> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    if trimmed.starts_with("```") {
        Some('`')
    } else if trimmed.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}

/// Merge blank or undersized sections into the section that follows.
///
/// The merged span takes the heading path of the section that absorbs it.
/// The final section is never merged away, whatever its size.
fn merge_short_sections(text: &str, sections: Vec<Section>, min_size: usize) -> Vec<Section> {
    let count = sections.len();
    let mut merged = Vec::with_capacity(count);
    let mut pending_start: Option<usize> = None;

    for (i, section) in sections.into_iter().enumerate() {
        let start = pending_start.unwrap_or(section.start);
        let span = &text[start..section.end];
        let undersized = span.trim().is_empty() || span.chars().count() < min_size;

        if undersized && i + 1 < count {
            pending_start = Some(start);
            continue;
        }

        pending_start = None;
        merged.push(Section {
            start,
            end: section.end,
            heading_path: section.heading_path,
        });
    }

    merged
}

/// Split one section into `(start, end)` byte ranges of at most `max_size`
/// characters each, except for single oversized tokens.
fn split_section(text: &str, section: &Section, max_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let body = &text[section.start..section.end];
    let chars: Vec<char> = body.chars().collect();
    let total = chars.len();

    if total <= max_size {
        return vec![(section.start, section.end)];
    }

    // byte_at[k] is the byte offset of the k-th char; byte_at[total] == body.len()
    let byte_at: Vec<usize> = body
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(body.len()))
        .collect();

    let is_boundary = |pos: usize| -> bool {
        pos == 0 || pos >= total || chars[pos - 1].is_whitespace() || chars[pos].is_whitespace()
    };

    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    loop {
        let limit = start + max_size;
        if limit >= total {
            pieces.push((start, total));
            break;
        }

        let mut end = limit;
        while end > start && !is_boundary(end) {
            end -= 1;
        }
        if end == start {
            // No word boundary inside the window: keep the whole token.
            end = limit;
            while end < total && !is_boundary(end) {
                end += 1;
            }
        }

        // An overlapped window that cannot reach past the previous piece
        // would lie inside it. Drop the overlap and start fresh.
        if end <= prev_end && start < prev_end {
            start = prev_end;
            continue;
        }

        pieces.push((start, end));
        prev_end = end;
        if end >= total {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        while next < end && !is_boundary(next) {
            next += 1;
        }
        start = if next > start { next } else { end };
    }

    absorb_blank_pieces(&chars, pieces)
        .into_iter()
        .map(|(s, e)| (section.start + byte_at[s], section.start + byte_at[e]))
        .collect()
}

/// Fold whitespace-only pieces into the piece before them (or, at the head
/// of a section, the piece after them). Coverage is unchanged.
fn absorb_blank_pieces(chars: &[char], pieces: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(pieces.len());
    let mut leading: Option<(usize, usize)> = None;

    for (start, end) in pieces {
        if chars[start..end].iter().all(|c| c.is_whitespace()) {
            match out.last_mut() {
                Some(last) => last.1 = last.1.max(end),
                None => {
                    let head = leading.map_or(start, |(s, _)| s);
                    leading = Some((head, end));
                }
            }
            continue;
        }
        let start = leading.take().map_or(start, |(s, _)| s.min(start));
        out.push((start, end));
    }

    if let Some(blank) = leading {
        out.push(blank);
    }
    out
}

fn make_chunk(
    document: &Document,
    config: &ChunkingConfig,
    index: usize,
    section: &Section,
    start: usize,
    end: usize,
) -> Chunk {
    let mut metadata = document.metadata.clone();
    metadata
        .entry("source".to_string())
        .or_insert_with(|| document.source_path.clone());
    metadata.insert(HEADING_WEIGHT_KEY.to_string(), config.heading_weight.to_string());
    metadata.insert(CHUNK_INDEX_KEY.to_string(), index.to_string());

    Chunk {
        id: chunk_id(&document.source_path, start, end),
        content: document.content[start..end].to_string(),
        metadata,
        heading_path: section.heading_path.clone(),
        source_offset: SourceOffset { start, end },
        is_ephemeral: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_size: usize, max_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            min_size,
            max_size,
            overlap,
            heading_weight: 0.0,
        }
    }

    fn doc(content: &str) -> Document {
        Document::new("notes/project.md", content)
    }

    fn assert_tiles(document: &Document, chunks: &[Chunk]) {
        let mut cursor = 0;
        for c in chunks {
            assert_eq!(c.source_offset.start, cursor, "gap or overlap before {:?}", c.source_offset);
            cursor = c.source_offset.end;
        }
        assert_eq!(cursor, document.content.len());
    }

    #[test]
    fn test_empty_document() {
        let chunks = chunk_document(&doc(""), &config(1, 100, 0)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_whitespace_document() {
        let chunks = chunk_document(&doc("  \n\n \t"), &config(1, 100, 0)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_no_headings_uses_root_path() {
        let chunks = chunk_document(&doc("Just some plain notes."), &config(1, 100, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].heading_path.is_empty());
        assert_eq!(chunks[0].content, "Just some plain notes.");
    }

    #[test]
    fn test_two_level_scenario() {
        let d = doc("# A\nfoo bar\n## B\nbaz qux");
        let chunks = chunk_document(&d, &config(1, 100, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading_path, vec!["A"]);
        assert_eq!(chunks[1].heading_path, vec!["A", "B"]);
        assert_eq!(chunks[0].content, "# A\nfoo bar\n");
        assert_eq!(chunks[1].content, "## B\nbaz qux");
        assert_eq!(chunks[0].source_offset, SourceOffset { start: 0, end: 12 });
        assert_eq!(chunks[1].source_offset, SourceOffset { start: 12, end: 24 });
        assert_tiles(&d, &chunks);
    }

    #[test]
    fn test_heading_stack_pops_on_shallower_heading() {
        let d = doc("# A\nx\n## B\ny\n### C\nz\n## D\nw\n# E\nv");
        let chunks = chunk_document(&d, &config(1, 100, 0)).unwrap();
        let paths: Vec<Vec<String>> = chunks.iter().map(|c| c.heading_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                vec!["A".to_string()],
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "B".to_string(), "C".to_string()],
                vec!["A".to_string(), "D".to_string()],
                vec!["E".to_string()],
            ]
        );
        assert_tiles(&d, &chunks);
    }

    #[test]
    fn test_preamble_before_first_heading() {
        let d = doc("Intro paragraph.\n# Title\nBody text.");
        let chunks = chunk_document(&d, &config(1, 100, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].heading_path.is_empty());
        assert_eq!(chunks[1].heading_path, vec!["Title"]);
    }

    #[test]
    fn test_short_section_merges_forward() {
        let d = doc("# A\n## B\nThis section has plenty of text in it.");
        let chunks = chunk_document(&d, &config(10, 100, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_offset.start, 0);
        assert_eq!(chunks[0].heading_path, vec!["A", "B"]);
        assert_tiles(&d, &chunks);
    }

    #[test]
    fn test_short_last_section_emitted_as_is() {
        let d = doc("# Long\nThis section is comfortably long enough.\n# End\nok");
        let chunks = chunk_document(&d, &config(20, 100, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "# End\nok");
        assert_eq!(chunks[1].heading_path, vec!["End"]);
    }

    #[test]
    fn test_oversized_single_word() {
        let word = "x".repeat(10_000);
        let d = doc(&word);
        let chunks = chunk_document(&d, &config(1, 500, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.len(), 10_000);
        assert_eq!(chunks[0].content, word);
    }

    #[test]
    fn test_split_never_breaks_a_token() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let d = doc(&text);
        let chunks = chunk_document(&d, &config(1, 50, 0)).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.chars().count() <= 50, "chunk too large: {:?}", c.content);
            let end = c.source_offset.end;
            if end < text.len() {
                let before = text[..end].chars().last().unwrap();
                let after = text[end..].chars().next().unwrap();
                assert!(
                    before.is_whitespace() || after.is_whitespace(),
                    "split inside a token at {}",
                    end
                );
            }
        }
        assert_tiles(&d, &chunks);
    }

    #[test]
    fn test_overlap_carries_tail_forward() {
        let text = (0..100)
            .map(|i| format!("w{:02}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let d = doc(&text);
        let chunks = chunk_document(&d, &config(1, 40, 12)).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.source_offset.start < prev.source_offset.end);
            assert!(next.source_offset.start > prev.source_offset.start);
            let shared = &text[next.source_offset.start..prev.source_offset.end];
            assert!(prev.content.ends_with(shared));
            assert!(next.content.starts_with(shared));
        }
        assert_eq!(chunks.last().unwrap().source_offset.end, text.len());
    }

    #[test]
    fn test_deterministic_ids_and_boundaries() {
        let d = doc("# Alpha\none two three four five\n## Beta\nsix seven eight nine ten");
        let c1 = chunk_document(&d, &config(1, 12, 4)).unwrap();
        let c2 = chunk_document(&d, &config(1, 12, 4)).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_ids_derive_from_path_and_offsets() {
        let a = chunk_document(&Document::new("a.md", "same text"), &config(1, 100, 0)).unwrap();
        let b = chunk_document(&Document::new("b.md", "same text"), &config(1, 100, 0)).unwrap();
        assert_ne!(a[0].id, b[0].id);
        assert_eq!(a[0].id, chunk_id("a.md", 0, 9));
    }

    #[test]
    fn test_headings_inside_code_fence_ignored() {
        let d = doc("# Real\nintro\n```\n# not a heading\n```\nafter");
        let chunks = chunk_document(&d, &config(1, 100, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, vec!["Real"]);
    }

    #[test]
    fn test_parse_heading_variants() {
        assert_eq!(parse_heading("# Title\n"), Some((1, "Title".to_string())));
        assert_eq!(parse_heading("### Deep ###\n"), Some((3, "Deep".to_string())));
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("####### seven"), None);
        assert_eq!(parse_heading("    # indented code"), None);
        assert_eq!(parse_heading("C#"), None);
    }

    #[test]
    fn test_metadata_records_weight_and_source() {
        let d = doc("text").with_metadata("type", "note");
        let mut cfg = config(1, 100, 0);
        cfg.heading_weight = 1.5;
        let chunks = chunk_document(&d, &cfg).unwrap();
        let meta = &chunks[0].metadata;
        assert_eq!(meta.get(HEADING_WEIGHT_KEY).map(String::as_str), Some("1.5"));
        assert_eq!(meta.get("source").map(String::as_str), Some("notes/project.md"));
        assert_eq!(meta.get("type").map(String::as_str), Some("note"));
        assert_eq!(meta.get(CHUNK_INDEX_KEY).map(String::as_str), Some("0"));
        assert!(!chunks[0].is_ephemeral);
    }

    #[test]
    fn test_overlap_never_yields_a_nested_chunk() {
        let text = format!("aaa bbb {}", "X".repeat(40));
        let d = doc(&text);
        let chunks = chunk_document(&d, &config(1, 10, 4)).unwrap();
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0].source_offset, &pair[1].source_offset);
            assert!(
                next.end > prev.end,
                "chunk {}..{} lies inside {}..{}",
                next.start,
                next.end,
                prev.start,
                prev.end
            );
        }
        let offsets: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| (c.source_offset.start, c.source_offset.end))
            .collect();
        assert_eq!(offsets, vec![(0, 8), (8, 48)]);
    }

    #[test]
    fn test_whitespace_runs_are_not_chunks_of_their_own() {
        let text = format!("word{}word", " ".repeat(40));
        let d = doc(&text);
        let chunks = chunk_document(&d, &config(1, 10, 0)).unwrap();
        for c in &chunks {
            assert!(!c.content.trim().is_empty(), "whitespace-only chunk at {:?}", c.source_offset);
        }
        assert_tiles(&d, &chunks);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_leading_whitespace_run_joins_following_piece() {
        let text = format!("{}alpha beta gamma", " ".repeat(30));
        let d = doc(&text);
        let chunks = chunk_document(&d, &config(1, 10, 0)).unwrap();
        assert!(chunks.iter().all(|c| !c.content.trim().is_empty()));
        assert_tiles(&d, &chunks);
        assert_eq!(chunks[0].source_offset.start, 0);
        assert!(chunks[0].content.trim_start().starts_with("alpha"));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello wörld      │\n└──────────────────┘";
        let d = doc(text);
        let chunks = chunk_document(&d, &config(1, 8, 2)).unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert_eq!(c.content, &text[c.source_offset.start..c.source_offset.end]);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let d = doc("text");
        assert!(chunk_document(&d, &config(1, 0, 0)).is_err());
        assert!(chunk_document(&d, &config(50, 10, 0)).is_err());
        assert!(chunk_document(&d, &config(1, 10, 10)).is_err());
        let mut cfg = config(1, 10, 0);
        cfg.heading_weight = f32::NAN;
        assert!(chunk_document(&d, &cfg).is_err());
    }
}
