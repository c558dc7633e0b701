//! In-text bracket citation extraction.
//!
//! Finds markers like `[5]`, `[10-15]` or `[5, 10–15]` in a passage and
//! resolves them to the set of cited reference numbers. Bracketed text that
//! is not a citation (`[Figure 1]`, `[sic]`) is discarded token by token; the
//! scan never fails.
//!
//! # Rules
//!
//! 1. Every innermost `[...]` group is considered.
//! 2. Its content is split on commas and each part trimmed.
//! 3. En-dash and em-dash are normalized to `-`.
//! 4. A part containing `-` is an inclusive range `start-end`; otherwise it is
//!    a single number.
//! 5. Parts that do not parse are dropped. Reversed ranges (`15-10`) and
//!    ranges spanning more than [`MAX_RANGE_SPAN`] numbers are dropped too.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Widest range accepted from a single token. Larger spans are almost always
/// years or page ranges (`[1990-2020]`) rather than citations.
pub const MAX_RANGE_SPAN: u32 = 500;

fn bracket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]").expect("bracket pattern is valid"))
}

/// Extract the sorted, de-duplicated citation numbers referenced in `text`.
pub fn parse_citations(text: &str) -> BTreeSet<u32> {
    let mut refs = BTreeSet::new();
    for caps in bracket_regex().captures_iter(text) {
        for part in caps[1].split(',') {
            add_part(part, &mut refs);
        }
    }
    refs
}

/// Comma-joined rendering used when citations are attached to a passage.
pub fn format_citations(refs: &BTreeSet<u32>) -> String {
    refs.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn add_part(part: &str, refs: &mut BTreeSet<u32>) {
    let part = part.trim().replace(['\u{2013}', '\u{2014}'], "-");
    if part.is_empty() {
        return;
    }

    if let Some((start, end)) = part.split_once('-') {
        let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) else {
            return;
        };
        if start > end || end - start > MAX_RANGE_SPAN {
            return;
        }
        refs.extend(start..=end);
    } else if let Ok(n) = part.parse::<u32>() {
        refs.insert(n);
    }
}
