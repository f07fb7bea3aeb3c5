//! Front-matter detection for extracted book chapters.

use std::sync::LazyLock;

use regex::Regex;

/// Titles that are never narrated when front matter is skipped.
const FRONT_MATTER_TITLES: &[&str] = &[
    "copyright",
    "legal notice",
    "table of contents",
    "contents",
    "toc",
    "acknowledgments",
    "acknowledgements",
    "dedication",
    "about the author",
    "title page",
    "cover",
    "also by",
    "front matter",
];

/// Front sections that belong to the narrated text.
const NARRATED_TITLES: &[&str] = &["foreword", "preface", "introduction", "prologue"];

/// Chapters at or before this position (1-based) may be short filler pages.
const EARLY_POSITION: usize = 2;
const SHORT_PAGE_WORDS: usize = 300;

static RE_BODY_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(chapter|part|book)\b").unwrap()
});

/// Whether a chapter looks like front matter.
///
/// `order` is the 1-based position in the extracted list.
pub fn is_front_matter(title: &str, order: usize, word_count: usize) -> bool {
    let title = title.trim().to_lowercase();

    if NARRATED_TITLES.iter().any(|t| title.starts_with(t)) || RE_BODY_HEADING.is_match(&title) {
        return false;
    }

    if title.starts_with("by ")
        || FRONT_MATTER_TITLES
            .iter()
            .any(|t| title == *t || title.starts_with(&format!("{} ", t)))
    {
        return true;
    }

    order <= EARLY_POSITION && word_count < SHORT_PAGE_WORDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_front_matter() {
        assert!(is_front_matter("Copyright", 1, 80));
        assert!(is_front_matter("Table of Contents", 3, 500));
        assert!(is_front_matter("Acknowledgments", 40, 900));
        assert!(is_front_matter("About the Author", 41, 400));
        assert!(is_front_matter("By the same author", 2, 1000));
    }

    #[test]
    fn test_narrated_openers_are_kept() {
        assert!(!is_front_matter("Foreword", 1, 50));
        assert!(!is_front_matter("Preface", 2, 120));
        assert!(!is_front_matter("Introduction", 1, 2000));
        assert!(!is_front_matter("Prologue", 1, 10));
    }

    #[test]
    fn test_short_early_pages() {
        assert!(is_front_matter("Copy", 1, 100));
        assert!(is_front_matter("Edition Info", 2, 200));
        assert!(!is_front_matter("Copy", 1, 1000));
        assert!(!is_front_matter("Edition Info", 3, 200));
    }

    #[test]
    fn test_body_headings_are_kept() {
        assert!(!is_front_matter("Chapter 1", 1, 50));
        assert!(!is_front_matter("Part One", 1, 20));
        assert!(!is_front_matter("The Contents of the Heart", 12, 3000));
    }
}
