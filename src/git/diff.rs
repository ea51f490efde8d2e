//! Unified diff parsing
//!
//! Turns the patch text of a single file into structured hunks:
//! - A synthetic `Header` line opens every hunk and keeps the raw `@@ ... @@` text
//! - Additions carry the new-file line number, deletions the old-file one
//! - Context lines carry both
//!
//! Anything before the first hunk header (`diff --git`, `index`, `---`/`+++`) is ignored.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{DiffHunk, DiffLine, DiffLineKind};

/// `@@ -oldStart[,oldCount] +newStart[,newCount] @@[ section]`
static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap()
});

/// Parsed hunk header ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkRange {
    old_start: u32,
    old_count: u32,
    new_start: u32,
    new_count: u32,
}

fn parse_header(line: &str) -> Option<HunkRange> {
    let caps = HUNK_HEADER.captures(line)?;
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    Some(HunkRange {
        old_start: number(1)?,
        // Omitted counts mean a single line
        old_count: number(2).unwrap_or(1),
        new_start: number(3)?,
        new_count: number(4).unwrap_or(1),
    })
}

/// Hunk under construction with its running line counters
struct OpenHunk {
    hunk: DiffHunk,
    old_line: u32,
    new_line: u32,
}

impl OpenHunk {
    fn start(range: HunkRange, header: &str) -> Self {
        Self {
            hunk: DiffHunk {
                old_start: range.old_start,
                old_count: range.old_count,
                new_start: range.new_start,
                new_count: range.new_count,
                lines: vec![DiffLine {
                    kind: DiffLineKind::Header,
                    content: header.to_string(),
                    old_line_number: None,
                    new_line_number: None,
                }],
            },
            old_line: range.old_start,
            new_line: range.new_start,
        }
    }

    fn push(&mut self, line: &str) {
        let (kind, content) = match line.as_bytes().first() {
            Some(b'+') => (DiffLineKind::Addition, &line[1..]),
            Some(b'-') => (DiffLineKind::Deletion, &line[1..]),
            Some(b' ') => (DiffLineKind::Context, &line[1..]),
            // "\ No newline at end of file" and friends
            _ => return,
        };

        let (old_line_number, new_line_number) = match kind {
            DiffLineKind::Addition => {
                self.new_line += 1;
                (None, Some(self.new_line - 1))
            }
            DiffLineKind::Deletion => {
                self.old_line += 1;
                (Some(self.old_line - 1), None)
            }
            _ => {
                self.old_line += 1;
                self.new_line += 1;
                (Some(self.old_line - 1), Some(self.new_line - 1))
            }
        };

        self.hunk.lines.push(DiffLine {
            kind,
            content: content.to_string(),
            old_line_number,
            new_line_number,
        });
    }
}

/// Parse the unified diff text of one file into hunks
pub fn parse_hunks(diff_text: &str) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<OpenHunk> = None;

    for line in diff_text.lines() {
        if let Some(range) = parse_header(line) {
            if let Some(open) = current.take() {
                hunks.push(open.hunk);
            }
            current = Some(OpenHunk::start(range, line));
            continue;
        }

        if let Some(open) = current.as_mut() {
            open.push(line);
        }
    }

    if let Some(open) = current {
        hunks.push(open.hunk);
    }

    hunks
}
