//! Backward scan for the bibliography heading.

use std::sync::OnceLock;

use regex::Regex;

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)references|bibliography|literature cited").expect("heading pattern is valid")
    })
}

/// Return the reference section of a document given its per-page text.
///
/// Pages are scanned from last to first. On the first page containing a
/// heading, the result is that page's text from the heading onwards followed
/// by every later page in order. No heading anywhere yields an empty string.
pub fn locate_reference_section(pages: &[String]) -> String {
    for (index, page) in pages.iter().enumerate().rev() {
        if let Some(m) = heading_regex().find(page) {
            let mut section = page[m.start()..].to_string();
            for later in &pages[index + 1..] {
                section.push_str(later);
            }
            return section;
        }
    }
    String::new()
}

/// True when `line` is nothing but a section heading, optionally numbered or
/// followed by a colon (`"7. References"`, `"BIBLIOGRAPHY:"`).
pub(crate) fn is_heading_line(line: &str) -> bool {
    let stripped = line
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
        .trim_end_matches([':', '.'])
        .trim();
    heading_regex()
        .find(stripped)
        .is_some_and(|m| m.start() == 0 && m.end() == stripped.len())
}

/// Strip a leading heading from the first line of a located section,
/// keeping anything that follows it on the same line.
pub(crate) fn strip_leading_heading(line: &str) -> &str {
    let trimmed = line.trim_start();
    match heading_regex().find(trimmed) {
        Some(m) if m.start() == 0 => trimmed[m.end()..].trim_start_matches([':', ' ', '\t']),
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_section_starts_at_heading_offset() {
        let doc = pages(&[
            "Introduction text.",
            "Results end here.\nReferences\n[1] Smith, J. 2020.\n",
            "[2] Doe, A. 2021.\n",
        ]);
        assert_eq!(
            locate_reference_section(&doc),
            "References\n[1] Smith, J. 2020.\n[2] Doe, A. 2021.\n"
        );
    }

    #[test]
    fn test_last_heading_wins() {
        let doc = pages(&[
            "As the references below show",
            "Body",
            "Bibliography\nA. Author. Title.",
        ]);
        assert_eq!(locate_reference_section(&doc), "Bibliography\nA. Author. Title.");
    }

    #[test]
    fn test_case_insensitive_and_literature_cited() {
        let doc = pages(&["LITERATURE CITED\nFoo"]);
        assert_eq!(locate_reference_section(&doc), "LITERATURE CITED\nFoo");
    }

    #[test]
    fn test_no_heading_yields_empty() {
        assert_eq!(locate_reference_section(&pages(&["a", "b"])), "");
        assert_eq!(locate_reference_section(&[]), "");
    }

    #[test]
    fn test_heading_line_detection() {
        assert!(is_heading_line("References"));
        assert!(is_heading_line("  7. REFERENCES: "));
        assert!(is_heading_line("Literature Cited"));
        assert!(!is_heading_line("References [1] Smith"));
        assert!(!is_heading_line("Smith, J."));
    }

    #[test]
    fn test_strip_leading_heading() {
        assert_eq!(strip_leading_heading("References: [1] Smith"), "[1] Smith");
        assert_eq!(strip_leading_heading("Smith"), "Smith");
    }
}
