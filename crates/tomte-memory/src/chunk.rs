// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// A contiguous window of a document, with 1-indexed inclusive line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Chunker tuning.  Budgets are in tokens, 1 token ≈ 4 characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub tokens: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            tokens: 400,
            overlap: 80,
        }
    }
}

/// Split `text` into line-integral chunks of roughly `tokens` tokens.
///
/// Lines are never split: an oversized line becomes a chunk on its own.
/// Consecutive chunks overlap by up to `overlap` tokens of trailing
/// lines, but each chunk always starts at least one line after its
/// predecessor, so progress is strict and the loop terminates.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let budget_chars = params.tokens.saturating_mul(4).max(1);
    let overlap_chars = params.overlap.saturating_mul(4);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        // Grow the window line by line until the budget is spent.
        let mut end = start;
        let mut used = lines[start].len();
        while end + 1 < lines.len() {
            let next_len = lines[end + 1].len() + 1; // +1 for the newline
            if used + next_len > budget_chars {
                break;
            }
            used += next_len;
            end += 1;
        }

        chunks.push(Chunk {
            text: lines[start..=end].join("\n"),
            start_line: start + 1,
            end_line: end + 1,
        });

        if end + 1 >= lines.len() {
            break;
        }

        // Back the next window up into the tail of this one, bounded by the
        // overlap budget and by strict forward progress.
        let mut next_start = end + 1;
        let mut overlap_used = 0usize;
        while next_start > start + 1 {
            let candidate = next_start - 1;
            let len = lines[candidate].len() + 1;
            if overlap_used + len > overlap_chars {
                break;
            }
            overlap_used += len;
            next_start = candidate;
        }
        start = next_start;
    }

    chunks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tokens: usize, overlap: usize) -> ChunkParams {
        ChunkParams { tokens, overlap }
    }

    fn numbered_lines(n: usize, width: usize) -> String {
        (0..n)
            .map(|i| format!("{:0width$}", i, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", &ChunkParams::default()).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello\nworld", &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello\nworld");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
    }

    #[test]
    fn line_ranges_are_one_indexed_inclusive() {
        // 10 tokens = 40 chars per chunk; 9-char lines (8 + newline)
        let text = numbered_lines(20, 8);
        let chunks = chunk_text(&text, &params(10, 0));
        assert_eq!(chunks[0].start_line, 1);
        let lines: Vec<&str> = text.split('\n').collect();
        for c in &chunks {
            let expected = lines[c.start_line - 1..=c.end_line - 1].join("\n");
            assert_eq!(c.text, expected, "range must map onto the source lines");
        }
    }

    #[test]
    fn every_line_appears_in_some_chunk() {
        let text = numbered_lines(50, 12);
        for (tokens, overlap) in [(10, 0), (10, 3), (25, 10), (4, 1)] {
            let chunks = chunk_text(&text, &params(tokens, overlap));
            let mut covered = vec![false; 50];
            for c in &chunks {
                for line in c.start_line..=c.end_line {
                    covered[line - 1] = true;
                }
            }
            assert!(
                covered.iter().all(|&c| c),
                "tokens={tokens} overlap={overlap}: some line was dropped"
            );
        }
    }

    #[test]
    fn never_splits_a_line() {
        let long = "x".repeat(500);
        let text = format!("short\n{long}\ntail");
        let chunks = chunk_text(&text, &params(10, 0));
        assert!(
            chunks.iter().any(|c| c.text.contains(&long)),
            "an oversized line must survive whole in a chunk"
        );
    }

    #[test]
    fn overlap_repeats_trailing_lines() {
        let text = numbered_lines(30, 12);
        let chunks = chunk_text(&text, &params(13, 4));
        assert!(chunks.len() >= 2);
        let first = &chunks[0];
        let second = &chunks[1];
        assert!(
            second.start_line <= first.end_line,
            "second chunk should back up into the first"
        );
        assert!(second.start_line > first.start_line, "strict progress");
    }

    #[test]
    fn zero_overlap_produces_disjoint_chunks() {
        let text = numbered_lines(30, 12);
        let chunks = chunk_text(&text, &params(13, 0));
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn overlap_never_stalls_progress() {
        // Overlap budget far larger than the chunk budget must still advance.
        let text = numbered_lines(40, 12);
        let chunks = chunk_text(&text, &params(5, 1000));
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
        }
        assert_eq!(chunks.last().unwrap().end_line, 40);
    }

    #[test]
    fn single_line_without_newline() {
        let chunks = chunk_text("only line", &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
    }

    #[test]
    fn trailing_newline_keeps_final_empty_line() {
        let chunks = chunk_text("a\nb\n", &ChunkParams::default());
        assert_eq!(chunks[0].end_line, 3, "split keeps the trailing empty line");
    }
}
