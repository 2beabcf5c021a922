//! Line-window text chunker.
//!
//! Splits normalized text into overlapping, size-bounded chunks. The window
//! advances by `window_size - overlap` lines, clamped to at least one line
//! so chunking always terminates even when `overlap >= window_size`.
//! Chunking is deterministic: identical input yields identical chunks, which
//! is what makes chunk-level dedup meaningful.
//!
//! A running heading path (built from ATX markers in the text) is carried
//! across chunk boundaries: each chunk records the path as of its last
//! line, so retrieval can show where in the document a chunk sits.

use crate::models::ChunkPiece;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into line windows of `window_size` lines overlapping by
/// `overlap` lines. Line numbers are 1-based inclusive.
pub fn chunk_text(text: &str, window_size: usize, overlap: usize) -> Vec<ChunkPiece> {
    let window_size = window_size.max(1);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let stride = (window_size.saturating_sub(overlap)).max(1);

    let mut chunks = Vec::new();
    let mut heading_path = HeadingPath::default();
    let mut scanned_to = 0usize; // lines consumed into the heading path

    let mut chunk_index: i64 = 0;
    let mut start = 0usize;

    while start < lines.len() {
        let end = (start + window_size).min(lines.len());

        // Advance the running heading path over newly seen lines only;
        // overlap lines were already consumed by the previous window.
        for line in lines.iter().take(end).skip(scanned_to) {
            heading_path.observe(line);
        }
        scanned_to = end;

        let chunk_lines = &lines[start..end];
        let content = chunk_lines.join("\n");

        chunks.push(ChunkPiece {
            chunk_index,
            text: content.clone(),
            start_line: (start + 1) as i64,
            end_line: end as i64,
            token_count: estimate_tokens(&content),
            heading_path: heading_path.current(),
        });

        chunk_index += 1;
        start += stride;
    }

    chunks
}

/// Rough token estimate used when no precise tokenizer is configured.
pub fn estimate_tokens(text: &str) -> i64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as i64
}

/// Stack of heading texts updated as lines stream past. A heading of level
/// N truncates the stack to N-1 entries and pushes itself.
#[derive(Debug, Default)]
struct HeadingPath {
    stack: Vec<(usize, String)>,
}

impl HeadingPath {
    fn observe(&mut self, line: &str) {
        let trimmed = line.trim_start();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if level == 0 || level > 6 {
            return;
        }
        let rest = &trimmed[level..];
        if !rest.starts_with(' ') {
            return;
        }
        let text = rest.trim().to_string();
        if text.is_empty() {
            return;
        }

        self.stack.retain(|(l, _)| *l < level);
        self.stack.push((level, text));
    }

    fn current(&self) -> Vec<String> {
        self.stack.iter().map(|(_, t)| t.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("only line", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_window_and_overlap() {
        let text = numbered_lines(25);
        let chunks = chunk_text(&text, 10, 2);
        // stride 8: starts at 0, 8, 16, 24
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 10);
        assert_eq!(chunks[1].start_line, 9);
        assert_eq!(chunks[1].end_line, 18);
        assert_eq!(chunks[3].start_line, 25);
        assert_eq!(chunks[3].end_line, 25);
    }

    #[test]
    fn test_overlap_invariant() {
        let text = numbered_lines(100);
        let chunks = chunk_text(&text, 10, 3);
        for pair in chunks.windows(2) {
            // Each chunk starts strictly after the previous start and no
            // later than just past the previous end.
            assert!(pair[1].start_line > pair[0].start_line);
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
    }

    #[test]
    fn test_forward_progress_when_overlap_exceeds_window() {
        let text = numbered_lines(20);
        // overlap >= window collapses the stride to a single line.
        let chunks = chunk_text(&text, 5, 50);
        assert_eq!(chunks.len(), 20);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.start_line, (i + 1) as i64);
        }
    }

    #[test]
    fn test_step_count_formula() {
        for (lines, window, overlap) in [(100, 10, 2), (7, 3, 0), (50, 10, 9), (10, 20, 5)] {
            let text = numbered_lines(lines);
            let chunks = chunk_text(&text, window, overlap);
            let stride = window.saturating_sub(overlap).max(1);
            let expected = lines.div_ceil(stride);
            assert_eq!(
                chunks.len(),
                expected,
                "lines={} window={} overlap={}",
                lines,
                window,
                overlap
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let text = numbered_lines(42);
        let a = chunk_text(&text, 10, 3);
        let b = chunk_text(&text, 10, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_heading_path_carried_across_chunks() {
        let mut lines = vec!["# Guide".to_string()];
        for i in 0..10 {
            lines.push(format!("intro {}", i));
        }
        lines.push("## Install".to_string());
        for i in 0..10 {
            lines.push(format!("step {}", i));
        }
        let text = lines.join("\n");

        let chunks = chunk_text(&text, 8, 0);
        assert!(chunks.len() >= 2);
        // First chunk sits under the document heading only.
        assert_eq!(chunks[0].heading_path, vec!["Guide"]);
        // A later chunk past the section marker carries the nested path.
        let last = chunks.last().unwrap();
        assert_eq!(last.heading_path, vec!["Guide", "Install"]);
    }

    #[test]
    fn test_heading_replaces_sibling_level() {
        let text = "# Top\n## A\nbody a\n## B\nbody b";
        let chunks = chunk_text(text, 10, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, vec!["Top", "B"]);
    }

    #[test]
    fn test_hash_marks_without_space_are_not_headings() {
        let text = "#!/bin/sh\necho hi";
        let chunks = chunk_text(text, 10, 0);
        assert!(chunks[0].heading_path.is_empty());
    }
}
