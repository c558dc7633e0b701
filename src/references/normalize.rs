//! Segmentation of a located reference section into entries.
//!
//! A two-state machine over lines. Outside an entry, any non-empty line opens
//! one. Inside an entry, a line that looks like an entry start closes the
//! current entry and opens the next; any other non-empty line is appended.
//! Blank lines never change state.

use std::sync::OnceLock;

use regex::Regex;

use super::locate::{is_heading_line, strip_leading_heading};
use crate::models::LocalReference;

fn entry_start_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[\[\]\d.]+\s*[A-Z]|[A-Z])").expect("entry pattern is valid")
    })
}

/// `[1] Smith`, `12 Doe`, `1. Roe` or a capitalized line.
pub fn is_entry_start(line: &str) -> bool {
    entry_start_regex().is_match(line)
}

enum SegmentState {
    OutsideEntry,
    InsideEntry(Vec<String>),
}

struct Segmenter {
    state: SegmentState,
    entries: Vec<String>,
}

impl Segmenter {
    fn new() -> Self {
        Self {
            state: SegmentState::OutsideEntry,
            entries: Vec::new(),
        }
    }

    fn feed(&mut self, line: String) {
        if line.is_empty() {
            return;
        }
        let state = std::mem::replace(&mut self.state, SegmentState::OutsideEntry);
        self.state = match state {
            SegmentState::OutsideEntry => SegmentState::InsideEntry(vec![line]),
            SegmentState::InsideEntry(current) if is_entry_start(&line) => {
                self.entries.push(current.join(" "));
                SegmentState::InsideEntry(vec![line])
            }
            SegmentState::InsideEntry(mut current) => {
                current.push(line);
                SegmentState::InsideEntry(current)
            }
        };
    }

    fn finish(mut self) -> Vec<String> {
        if let SegmentState::InsideEntry(current) = self.state {
            self.entries.push(current.join(" "));
        }
        self.entries
    }
}

/// Split a located reference section into numbered entries.
///
/// Whitespace runs inside each line collapse to one space; line breaks are
/// what separates candidate entries. A heading on the first line is dropped.
/// Empty input yields no entries.
pub fn normalize_references(section: &str) -> Vec<LocalReference> {
    let mut segmenter = Segmenter::new();
    let mut seen_first = false;

    for raw in section.lines() {
        let mut line = raw;
        if !seen_first && !line.trim().is_empty() {
            seen_first = true;
            if is_heading_line(line) {
                continue;
            }
            line = strip_leading_heading(line);
        }
        segmenter.feed(collapse_whitespace(line));
    }

    segmenter
        .finish()
        .into_iter()
        .enumerate()
        .map(|(i, raw_text)| LocalReference {
            ordinal: i + 1,
            raw_text,
        })
        .collect()
}

/// Render entries the way `references.txt` stores them.
pub fn format_local_references(entries: &[LocalReference]) -> String {
    entries
        .iter()
        .map(LocalReference::display)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
