//! EPUB extraction: `META-INF/container.xml` → OPF package → spine order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::engine::Chapter;
use crate::error::BoxError;
use crate::jobs::BookMetadata;

const CONTAINER_PATH: &str = "META-INF/container.xml";

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h[1-3][^>]*>(.*?)</h[1-3]>").unwrap());
static RE_SKIPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(head|script|style)[^>]*>.*?</(head|script|style)>").unwrap());

/// Chapters in spine order, one per non-empty document.
pub fn extract_epub(path: &Path) -> Result<Vec<Chapter>, BoxError> {
    let mut archive = open_archive(path)?;
    let (opf_path, package) = read_package(&mut archive)?;

    let mut chapters = Vec::new();
    for idref in &package.spine {
        let Some(item) = package.manifest.get(idref) else {
            tracing::debug!(idref = %idref, "spine entry missing from manifest");
            continue;
        };
        if !item.is_document() {
            continue;
        }

        let entry = resolve_href(&opf_path, &item.href);
        let xhtml = match read_entry(&mut archive, &entry) {
            Ok(xhtml) => xhtml,
            Err(e) => {
                tracing::warn!(entry = %entry, error = %e, "skipping unreadable spine document");
                continue;
            }
        };

        let document = document_text(&xhtml);
        if document.body.is_empty() {
            continue;
        }

        let order = chapters.len() + 1;
        let title = document
            .heading
            .unwrap_or_else(|| format!("Chapter {}", order));
        chapters.push(Chapter::new(title, document.body, order));
    }

    Ok(chapters)
}

/// Dublin Core metadata from the OPF package.
pub fn epub_metadata(path: &Path) -> Result<BookMetadata, BoxError> {
    let mut archive = open_archive(path)?;
    let (_, package) = read_package(&mut archive)?;
    Ok(package.metadata)
}

// ─── Package ───

#[derive(Debug)]
struct ManifestItem {
    href: String,
    media_type: String,
}

impl ManifestItem {
    fn is_document(&self) -> bool {
        self.media_type.is_empty() || self.media_type.contains("html")
    }
}

#[derive(Debug, Default)]
struct Package {
    metadata: BookMetadata,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum MetaField {
    Title,
    Creator,
    Publisher,
    Language,
    Identifier,
    Date,
    Description,
}

impl MetaField {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(MetaField::Title),
            b"creator" => Some(MetaField::Creator),
            b"publisher" => Some(MetaField::Publisher),
            b"language" => Some(MetaField::Language),
            b"identifier" => Some(MetaField::Identifier),
            b"date" => Some(MetaField::Date),
            b"description" => Some(MetaField::Description),
            _ => None,
        }
    }
}

impl Package {
    fn record_element(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"item" => {
                if let (Some(id), Some(href)) = (attribute(e, b"id"), attribute(e, b"href")) {
                    let media_type = attribute(e, b"media-type").unwrap_or_default();
                    self.manifest.insert(id, ManifestItem { href, media_type });
                }
            }
            b"itemref" => {
                let linear = attribute(e, b"linear");
                if let Some(idref) = attribute(e, b"idref") {
                    if linear.as_deref() != Some("no") {
                        self.spine.push(idref);
                    }
                }
            }
            _ => {}
        }
    }

    /// First value wins, as in most readers.
    fn record_metadata(&mut self, field: MetaField, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let metadata = &mut self.metadata;
        let slot = match field {
            MetaField::Title => &mut metadata.title,
            MetaField::Creator => &mut metadata.author,
            MetaField::Publisher => &mut metadata.publisher,
            MetaField::Language => &mut metadata.language,
            MetaField::Date => &mut metadata.publication_date,
            MetaField::Description => &mut metadata.description,
            MetaField::Identifier => {
                if metadata.isbn.is_none() {
                    metadata.isbn = isbn_from_identifier(value);
                }
                return;
            }
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn isbn_from_identifier(value: &str) -> Option<String> {
    let lower = value.to_lowercase();
    let stripped = lower
        .strip_prefix("urn:isbn:")
        .or_else(|| lower.strip_prefix("isbn:"))
        .unwrap_or(&lower);
    let compact: String = stripped
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect::<String>()
        .to_uppercase();

    let valid = match compact.len() {
        13 => compact.chars().all(|c| c.is_ascii_digit()),
        10 => compact
            .char_indices()
            .all(|(i, c)| c.is_ascii_digit() || (i == 9 && c == 'X')),
        _ => false,
    };
    valid.then_some(compact)
}

// ─── Archive access ───

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>, BoxError> {
    let file = File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    let archive = zip::ZipArchive::new(file)
        .map_err(|e| format!("Failed to open EPUB {}: {}", path.display(), e))?;
    Ok(archive)
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, BoxError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| format!("Failed to find {}: {}", name, e))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| format!("Failed to read {}: {}", name, e))?;
    Ok(content)
}

fn read_package<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<(String, Package), BoxError> {
    let container = read_entry(archive, CONTAINER_PATH)?;
    let opf_path = rootfile_path(&container)?;
    let opf = read_entry(archive, &opf_path)?;
    let package = parse_package(&opf)?;
    Ok((opf_path, package))
}

fn rootfile_path(container_xml: &str) -> Result<String, BoxError> {
    let mut reader = Reader::from_str(container_xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attribute(e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("container.xml parsing error: {}", e).into()),
            _ => {}
        }
    }

    Err("container.xml has no rootfile".into())
}

fn parse_package(opf: &str) -> Result<Package, BoxError> {
    let mut reader = Reader::from_str(opf);
    reader.config_mut().trim_text(true);

    let mut package = Package::default();
    let mut in_metadata = false;
    let mut field: Option<MetaField> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local_name = e.local_name();
                if local_name.as_ref() == b"metadata" {
                    in_metadata = true;
                } else if in_metadata {
                    field = MetaField::from_local_name(local_name.as_ref());
                }
                package.record_element(e);
            }
            Ok(Event::Empty(ref e)) => package.record_element(e),
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"metadata" {
                    in_metadata = false;
                }
                field = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(field) = field {
                    let decoded = e.unescape().unwrap_or_default();
                    package.record_metadata(field, &decoded);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("OPF parsing error: {}", e).into()),
            _ => {}
        }
    }

    Ok(package)
}

/// Resolves a manifest href against the OPF file's directory.
fn resolve_href(opf_path: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href).replace("%20", " ");
    let mut segments: Vec<&str> = match opf_path.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

// ─── Document text ───

#[derive(Debug, Default, PartialEq)]
struct DocumentText {
    heading: Option<String>,
    body: String,
}

fn is_block(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"section"
            | b"blockquote"
            | b"li"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"tr"
    )
}

fn is_skipped(name: &[u8]) -> bool {
    matches!(name, b"head" | b"script" | b"style")
}

fn is_heading(name: &[u8]) -> bool {
    matches!(name, b"h1" | b"h2" | b"h3")
}

/// Body text of an XHTML document with its first heading split out as
/// the title.
fn document_text(xhtml: &str) -> DocumentText {
    match parse_xhtml(xhtml) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(error = %e, "XHTML is not well-formed, stripping tags");
            strip_markup(xhtml)
        }
    }
}

fn parse_xhtml(xhtml: &str) -> Result<DocumentText, quick_xml::Error> {
    let mut reader = Reader::from_str(xhtml);
    reader.config_mut().trim_text(true);

    let mut raw = String::new();
    let mut heading: Option<String> = None;
    let mut heading_buf = String::new();
    let mut in_heading = false;
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();
                if is_skipped(name) {
                    skip_depth += 1;
                } else if is_heading(name) && heading.is_none() && !in_heading {
                    in_heading = true;
                    heading_buf.clear();
                }
            }
            Event::End(ref e) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();
                if is_skipped(name) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if is_heading(name) && in_heading {
                    in_heading = false;
                    let title = collapse_whitespace(&heading_buf);
                    if !title.is_empty() {
                        heading = Some(title);
                        continue;
                    }
                    // An empty heading contributes nothing; fall through to
                    // the body text.
                    raw.push_str(&heading_buf);
                }
                if is_block(name) {
                    raw.push('\n');
                }
            }
            Event::Empty(ref e) => {
                if e.local_name().as_ref() == b"br" {
                    raw.push('\n');
                }
            }
            Event::Text(e) => {
                if skip_depth > 0 {
                    continue;
                }
                let decoded = e.unescape().unwrap_or_default();
                if in_heading {
                    heading_buf.push(' ');
                    heading_buf.push_str(&decoded);
                } else {
                    raw.push(' ');
                    raw.push_str(&decoded);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(DocumentText {
        heading,
        body: normalize_body(&raw),
    })
}

fn strip_markup(xhtml: &str) -> DocumentText {
    let without_head = RE_SKIPPED.replace_all(xhtml, " ");
    let heading = RE_HEADING
        .captures(&without_head)
        .map(|c| collapse_whitespace(&RE_TAG.replace_all(&c[1], " ")))
        .filter(|h| !h.is_empty());
    let body = match RE_HEADING.find(&without_head) {
        Some(m) if heading.is_some() => {
            format!("{}\n{}", &without_head[..m.start()], &without_head[m.end()..])
        }
        _ => without_head.to_string(),
    };
    let body = body
        .replace("</p>", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n");
    DocumentText {
        heading,
        body: normalize_body(&RE_TAG.replace_all(&body, " ")),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_body(raw: &str) -> String {
    raw.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use zip::write::SimpleFileOptions;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>The Long Road</dc:title>
    <dc:creator>Ada Writer</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier>urn:isbn:978-0-306-40615-7</dc:identifier>
    <dc:publisher>Small Press</dc:publisher>
  </metadata>
  <manifest>
    <item id="cover" href="images/cover.jpg" media-type="image/jpeg"/>
    <item id="c1" href="text/one.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/two.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="text/notes.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c2"/>
    <itemref idref="c1"/>
    <itemref idref="notes" linear="no"/>
  </spine>
</package>"#;

    fn xhtml(heading: &str, body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>ignored</title><style>p {{}}</style></head><body><h1>{}</h1>{}</body></html>"#,
            heading, body
        )
    }

    fn build_epub() -> NamedTempFile {
        let file = NamedTempFile::with_suffix(".epub").unwrap();
        let mut zip = zip::ZipWriter::new(file.reopen().unwrap());
        let options = SimpleFileOptions::default();

        let entries = [
            (CONTAINER_PATH.to_string(), CONTAINER.to_string()),
            ("OEBPS/content.opf".to_string(), OPF.to_string()),
            (
                "OEBPS/text/one.xhtml".to_string(),
                xhtml("Beginnings", "<p>It started <em>early</em>.</p><p>Then it rained.</p>"),
            ),
            (
                "OEBPS/text/two.xhtml".to_string(),
                xhtml("Preface", "<p>A short note.</p>"),
            ),
            ("OEBPS/text/notes.xhtml".to_string(), xhtml("Notes", "<p>Aside.</p>")),
        ];
        for (name, content) in entries {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        file
    }

    #[test]
    fn test_chapters_follow_spine_order() {
        let epub = build_epub();
        let chapters = extract_epub(epub.path()).unwrap();

        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Preface", "Beginnings"]);
        assert_eq!(chapters[1].order, 2);
        assert_eq!(chapters[1].content, "It started early .\nThen it rained.");
    }

    #[test]
    fn test_metadata_reads_dublin_core() {
        let epub = build_epub();
        let metadata = epub_metadata(epub.path()).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("The Long Road"));
        assert_eq!(metadata.author.as_deref(), Some("Ada Writer"));
        assert_eq!(metadata.language.as_deref(), Some("en"));
        assert_eq!(metadata.publisher.as_deref(), Some("Small Press"));
        assert_eq!(metadata.isbn.as_deref(), Some("9780306406157"));
    }

    #[test]
    fn test_not_a_zip() {
        let mut file = NamedTempFile::with_suffix(".epub").unwrap();
        writeln!(file, "plain text").unwrap();
        assert!(extract_epub(file.path()).is_err());
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS/content.opf", "text/a.xhtml#x"), "OEBPS/text/a.xhtml");
        assert_eq!(resolve_href("content.opf", "a.xhtml"), "a.xhtml");
        assert_eq!(resolve_href("OPS/pkg/content.opf", "../Text/My%20Ch.xhtml"), "OPS/Text/My Ch.xhtml");
    }

    #[test]
    fn test_malformed_markup_falls_back_to_tag_stripping() {
        let doc = document_text("<html><body><h2>Storm</h2><p>Wind<br>and rain</p><p>unclosed</body>");
        assert_eq!(doc.heading.as_deref(), Some("Storm"));
        assert_eq!(doc.body, "Wind\nand rain\nunclosed");
    }

    #[test]
    fn test_isbn_detection() {
        assert_eq!(isbn_from_identifier("urn:isbn:0-306-40615-2"), Some("0306406152".into()));
        assert_eq!(isbn_from_identifier("urn:uuid:1234"), None);
    }
}
