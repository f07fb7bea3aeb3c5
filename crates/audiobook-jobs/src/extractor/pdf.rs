//! PDF extraction via `lopdf`: page text grouped into chapters by heading
//! lines, plus the document Info dictionary.

use std::path::Path;
use std::sync::LazyLock;

use lopdf::{Dictionary, Document, Object};
use regex::Regex;

use crate::engine::Chapter;
use crate::error::BoxError;
use crate::jobs::BookMetadata;

/// Headings longer than this are body text that happens to start with
/// "Chapter".
const MAX_HEADING_CHARS: usize = 80;

static RE_CHAPTER_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(chapter|part|book)\s+([0-9]+|[ivxlcdm]+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve)\b|^(prologue|epilogue|introduction|preface|foreword|afterword)$",
    )
    .unwrap()
});

/// Title given to pages that precede the first detected heading.
pub const LEADING_PAGES_TITLE: &str = "Front Matter";

pub fn extract_pdf(path: &Path) -> Result<Vec<Chapter>, BoxError> {
    let _span = tracing::info_span!("extractor.pdf").entered();

    let doc = load(path)?;
    let mut pages = Vec::new();
    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                tracing::warn!(page = page_num, error = %e, "could not extract page text");
            }
        }
    }

    Ok(group_pages(&pages))
}

pub fn pdf_metadata(path: &Path) -> Result<BookMetadata, BoxError> {
    let doc = load(path)?;
    let Some(info) = info_dictionary(&doc) else {
        return Ok(BookMetadata::default());
    };

    Ok(BookMetadata {
        title: text_entry(info, b"Title"),
        author: text_entry(info, b"Author"),
        description: text_entry(info, b"Subject"),
        publication_date: text_entry(info, b"CreationDate").and_then(|d| pdf_date(&d)),
        ..Default::default()
    })
}

fn load(path: &Path) -> Result<Document, BoxError> {
    Document::load(path)
        .map_err(|e| format!("Failed to load PDF {}: {}", path.display(), e).into())
}

/// Splits page texts into chapters.
///
/// A page whose first non-empty line is a chapter heading starts a new
/// chapter. Without any headings the whole document is one chapter.
pub(crate) fn group_pages(pages: &[String]) -> Vec<Chapter> {
    let mut sections: Vec<(Option<String>, String)> = Vec::new();

    for page in pages {
        let mut lines = page.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(first) = lines.next() else {
            continue;
        };

        if is_heading(first) {
            let rest: Vec<&str> = lines.collect();
            sections.push((Some(first.to_string()), rest.join("\n")));
            continue;
        }

        let text = page.trim();
        match sections.last_mut() {
            Some((_, content)) => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(text);
            }
            None => sections.push((None, text.to_string())),
        }
    }

    let has_headings = sections.iter().any(|(title, _)| title.is_some());
    sections
        .into_iter()
        .filter(|(_, content)| !content.trim().is_empty())
        .enumerate()
        .map(|(i, (title, content))| {
            let title = match title {
                Some(title) => title,
                None if has_headings => LEADING_PAGES_TITLE.to_string(),
                None => "Chapter 1".to_string(),
            };
            Chapter::new(title, content, i + 1)
        })
        .collect()
}

fn is_heading(line: &str) -> bool {
    line.chars().count() <= MAX_HEADING_CHARS && RE_CHAPTER_HEADING.is_match(line)
}

// ─── Info dictionary ───

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    let bytes = dict.get(key).ok()?.as_str().ok()?;
    let text = decode_text_string(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// PDF text strings are UTF-16BE with a BOM, UTF-8 with a BOM, or
/// PDFDocEncoding (treated as Latin-1).
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// `D:20190304...` → `2019-03-04`.
fn pdf_date(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.len() {
        n if n >= 8 => Some(format!("{}-{}-{}", &digits[..4], &digits[4..6], &digits[6..8])),
        n if n >= 4 => Some(digits[..4].to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};
    use tempfile::NamedTempFile;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_no_headings_is_one_chapter() {
        let chapters = group_pages(&pages(&["Once upon a time.", "", "The end."]));
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Chapter 1");
        assert_eq!(chapters[0].content, "Once upon a time.\nThe end.");
    }

    #[test]
    fn test_headings_open_chapters() {
        let chapters = group_pages(&pages(&[
            "A Novel\nby Someone",
            "Chapter 1\nIt was dark.",
            "Still dark.",
            "CHAPTER II\nMorning came.",
        ]));

        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec![LEADING_PAGES_TITLE, "Chapter 1", "CHAPTER II"]);
        assert_eq!(chapters[1].content, "It was dark.\nStill dark.");
        assert_eq!(chapters[2].order, 3);
    }

    #[test]
    fn test_long_line_is_not_a_heading() {
        assert!(is_heading("Prologue"));
        assert!(is_heading("Part Two: The Return"));
        assert!(!is_heading("Chapter and verse were quoted at length by every guest who came through the door that night"));
        assert!(!is_heading("Chapters of life"));
    }

    #[test]
    fn test_decode_text_string() {
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_text_string(b"Plain"), "Plain");
        assert_eq!(decode_text_string(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }

    #[test]
    fn test_pdf_date() {
        assert_eq!(pdf_date("D:20190304120000Z").as_deref(), Some("2019-03-04"));
        assert_eq!(pdf_date("D:2019").as_deref(), Some("2019"));
        assert_eq!(pdf_date("unknown"), None);
    }

    fn write_pdf(lines: &[&str], info: Option<Dictionary>) -> NamedTempFile {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let content: String = lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("BT /F1 12 Tf 50 {} Td ({}) Tj ET\n", 700 - i * 14, line))
            .collect();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(info) = info {
            let info_id = doc.add_object(info);
            doc.trailer.set("Info", info_id);
        }

        let file = NamedTempFile::with_suffix(".pdf").unwrap();
        doc.save(file.path()).unwrap();
        file
    }

    #[test]
    fn test_extract_embedded_text() {
        let pdf = write_pdf(&["Rivers run to the sea."], None);
        let chapters = extract_pdf(pdf.path()).unwrap();
        assert_eq!(chapters.len(), 1);
        assert!(chapters[0].content.contains("Rivers"));
    }

    #[test]
    fn test_metadata_from_info_dictionary() {
        let pdf = write_pdf(
            &["Body"],
            Some(dictionary! {
                "Title" => Object::string_literal("Deep Water"),
                "Author" => Object::string_literal("R. Fisher"),
                "CreationDate" => Object::string_literal("D:20210115093000Z"),
            }),
        );
        let metadata = pdf_metadata(pdf.path()).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Deep Water"));
        assert_eq!(metadata.author.as_deref(), Some("R. Fisher"));
        assert_eq!(metadata.publication_date.as_deref(), Some("2021-01-15"));
        assert_eq!(metadata.publisher, None);
    }

    #[test]
    fn test_metadata_without_info() {
        let pdf = write_pdf(&["Body"], None);
        assert!(pdf_metadata(pdf.path()).unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_pdf_error() {
        let file = NamedTempFile::with_suffix(".pdf").unwrap();
        std::fs::write(file.path(), b"not a valid pdf content").unwrap();
        let err = extract_pdf(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load PDF"));
    }
}
