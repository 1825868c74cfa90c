//! Document loading: format detection, text extraction, normalization.
//!
//! Every format is handled by an [`Extractor`] registered in an
//! [`ExtractorRegistry`] under a canonical name and any number of aliases.
//! Extractors return ordered text segments (paragraphs, slides); [`load`]
//! normalizes them and joins them with blank lines into the document body,
//! so passage offsets always index into the same string the chunker saw.
//!
//! | Format | Extractor | Segments |
//! |--------|-----------|----------|
//! | `pdf` | pdf-extract | blank-line separated blocks |
//! | `docx` | zip + quick-xml over `word/document.xml` | one per `w:p` |
//! | `pptx` | zip + quick-xml over `ppt/slides/slideN.xml` | one per slide |
//! | `html` | tag stripper | one per block element |
//! | `txt` | UTF-8 | blank-line separated blocks |
//! | `md` | UTF-8, heading/quote markers stripped | blank-line separated blocks |

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::Event;
use sha2::{Digest, Sha256};

use marketmuse_core::models::Document;
use marketmuse_core::{Error, Result};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Converts raw bytes of one format into ordered text segments.
pub trait Extractor: Send + Sync {
    /// Canonical format name, e.g. `"docx"`.
    fn format(&self) -> &str;

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

/// Format name → extractor dispatch table.
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
    aliases: HashMap<String, String>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Registry with every built-in format.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfExtractor), &[]);
        registry.register(Arc::new(DocxExtractor), &["doc"]);
        registry.register(Arc::new(PptxExtractor), &["ppt"]);
        registry.register(Arc::new(HtmlExtractor), &["htm", "xhtml"]);
        registry.register(Arc::new(TxtExtractor), &["text"]);
        registry.register(Arc::new(MarkdownExtractor), &["markdown"]);
        registry
    }

    /// Register `extractor` under its canonical name plus `aliases`.
    /// A later registration for the same name replaces the earlier one.
    pub fn register(&mut self, extractor: Arc<dyn Extractor>, aliases: &[&str]) {
        let name = extractor.format().to_ascii_lowercase();
        self.aliases.insert(name.clone(), name.clone());
        for alias in aliases {
            self.aliases.insert(alias.to_ascii_lowercase(), name.clone());
        }
        self.extractors.insert(name, extractor);
    }

    /// Canonical name for a format name or alias.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let key = name.trim().trim_start_matches('.').to_ascii_lowercase();
        self.aliases.get(&key).map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Extractor> {
        let canonical = self.resolve(name)?;
        self.extractors.get(canonical).map(|e| e.as_ref())
    }

    /// Canonical format names, sorted.
    pub fn formats(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether a file with this path's extension could be loaded.
    pub fn supports_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.resolve(e).is_some())
            .unwrap_or(false)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// A freshly loaded document and the segments its body was built from.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: Document,
    pub segments: Vec<String>,
}

/// Format name from a filename's extension, lowercased.
pub fn detect_format(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// SHA-256 hex digest of raw upload bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Extract and normalize `bytes` into a new [`Document`].
///
/// `declared` overrides extension-based detection. Assigns a fresh id and
/// ingestion timestamp; does not touch any store.
pub fn load(
    registry: &ExtractorRegistry,
    bytes: &[u8],
    filename: &str,
    declared: Option<&str>,
) -> Result<LoadedDocument> {
    let requested = match declared {
        Some(format) => format.to_string(),
        None => detect_format(filename).ok_or_else(|| {
            Error::UnsupportedFormat(format!("no file extension on '{}'", filename))
        })?,
    };
    let extractor = registry
        .get(&requested)
        .ok_or_else(|| Error::UnsupportedFormat(requested.clone()))?;

    let segments: Vec<String> = extractor
        .extract(bytes)?
        .iter()
        .map(|s| normalize_segment(s))
        .filter(|s| !s.is_empty())
        .collect();
    let body = segments.join("\n\n");

    tracing::debug!(
        filename,
        format = extractor.format(),
        bytes = bytes.len(),
        segments = segments.len(),
        chars = body.chars().count(),
        "extracted document"
    );

    Ok(LoadedDocument {
        document: Document {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            format: extractor.format().to_string(),
            byte_size: bytes.len() as u64,
            content_hash: content_hash(bytes),
            ingested_at: chrono::Utc::now().timestamp(),
            body,
        },
        segments,
    })
}

/// Trim each line, collapse whitespace runs inside it, drop blank lines.
fn normalize_segment(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split plain text into blocks separated by blank lines.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn utf8<'a>(format: &str, bytes: &'a [u8]) -> Result<&'a str> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::corrupt(format, format!("not valid UTF-8: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

// ============ pdf ============

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn format(&self) -> &str {
        "pdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
        // pdf-extract panics on some malformed inputs.
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(bytes)
        }));
        match outcome {
            Ok(Ok(text)) => Ok(paragraphs(&text)),
            Ok(Err(e)) => Err(Error::corrupt("pdf", e)),
            Err(_) => Err(Error::corrupt("pdf", "parser panicked on malformed input")),
        }
    }
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive<'a>(format: &str, bytes: &'a [u8]) -> Result<Archive<'a>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::corrupt(format, format!("not a ZIP container: {}", e)))
}

fn read_entry_bounded(format: &str, archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::corrupt(format, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| Error::corrupt(format, format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::corrupt(
            format,
            format!("{} exceeds {} decompressed bytes", name, MAX_XML_ENTRY_BYTES),
        ));
    }
    Ok(out)
}

/// Text of every paragraph element in a WordprocessingML or DrawingML part.
///
/// Paragraphs are `<w:p>` / `<a:p>`, runs of text are `<w:t>` / `<a:t>`;
/// both match on local name.
fn xml_paragraphs(format: &str, xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push(' '),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| Error::corrupt(format, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::corrupt(format, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn format(&self) -> &str {
        "docx"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let mut archive = open_archive("docx", bytes)?;
        if !archive.file_names().any(|n| n == "word/document.xml") {
            return Err(Error::corrupt("docx", "word/document.xml not found"));
        }
        let xml = read_entry_bounded("docx", &mut archive, "word/document.xml")?;
        xml_paragraphs("docx", &xml)
    }
}

pub struct PptxExtractor;

impl Extractor for PptxExtractor {
    fn format(&self) -> &str {
        "pptx"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let mut archive = open_archive("pptx", bytes)?;
        let mut slides: Vec<(u32, String)> = archive
            .file_names()
            .filter_map(|name| {
                let number = name
                    .strip_prefix("ppt/slides/slide")?
                    .strip_suffix(".xml")?
                    .parse::<u32>()
                    .ok()?;
                Some((number, name.to_string()))
            })
            .collect();
        if slides.is_empty() {
            return Err(Error::corrupt("pptx", "no slides found under ppt/slides/"));
        }
        slides.sort_unstable();

        let mut out = Vec::with_capacity(slides.len());
        for (_, name) in slides {
            let xml = read_entry_bounded("pptx", &mut archive, &name)?;
            let paragraphs = xml_paragraphs("pptx", &xml)?;
            out.push(paragraphs.join("\n"));
        }
        Ok(out)
    }
}

// ============ html ============

/// Elements whose content is never visible text.
const HTML_SKIP: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "iframe",
];

/// Elements that start or end a paragraph.
const HTML_BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn format(&self) -> &str {
        "html"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
        Ok(html_segments(utf8("html", bytes)?))
    }
}

fn html_segments(src: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets aligned with `src`.
    let lower = src.to_ascii_lowercase();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    let mut flush = |current: &mut String| {
        if !current.trim().is_empty() {
            segments.push(std::mem::take(current));
        }
        current.clear();
    };

    while i < src.len() {
        let rest = &src[i..];
        if rest.starts_with("<!--") {
            i = match lower[i..].find("-->") {
                Some(end) => i + end + 3,
                None => src.len(),
            };
            continue;
        }
        let close = rest.find('>').filter(|_| opens_tag(rest));
        let Some(close) = close else {
            // Text runs up to the next `<` that starts a tag.
            let first = rest.chars().next().map_or(1, char::len_utf8);
            let end = rest[first..]
                .match_indices('<')
                .map(|(p, _)| first + p)
                .find(|&p| opens_tag(&rest[p..]))
                .map_or(src.len(), |p| i + p);
            let text = decode_entities(&src[i..end]);
            for c in text.chars() {
                current.push(if c.is_whitespace() { ' ' } else { c });
            }
            i = end;
            continue;
        };
        let tag = &lower[i + 1..i + close];
        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches(['/', '!', '?'])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        i += close + 1;

        if !closing && !tag.ends_with('/') && HTML_SKIP.contains(&name.as_str()) {
            let end_tag = format!("</{}", name);
            i = match lower[i..].find(&end_tag) {
                Some(p) => {
                    let after = i + p;
                    lower[after..].find('>').map(|q| after + q + 1).unwrap_or(src.len())
                }
                None => src.len(),
            };
            continue;
        }
        if name == "br" {
            current.push('\n');
        } else if HTML_BLOCKS.contains(&name.as_str()) {
            flush(&mut current);
        }
    }
    flush(&mut current);
    segments
}

/// `<` followed by a letter, `/`, `!` or `?`. Anything else is literal text.
fn opens_tag(s: &str) -> bool {
    let mut bytes = s.bytes();
    bytes.next() == Some(b'<')
        && bytes
            .next()
            .is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'))
}

fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|&semi| semi > 1 && semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "hellip" => '\u{2026}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        _ => return None,
    })
}

// ============ plain text ============

pub struct TxtExtractor;

impl Extractor for TxtExtractor {
    fn format(&self) -> &str {
        "txt"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
        Ok(paragraphs(utf8("txt", bytes)?))
    }
}

pub struct MarkdownExtractor;

impl Extractor for MarkdownExtractor {
    fn format(&self) -> &str {
        "md"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let text = utf8("md", bytes)?;
        let stripped: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .map(strip_markdown_markers)
            .collect();
        Ok(paragraphs(&stripped.join("\n")))
    }
}

fn strip_markdown_markers(line: &str) -> &str {
    let mut line = line.trim_start();
    while let Some(rest) = line.strip_prefix('>') {
        line = rest.trim_start();
    }
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes > 0 && hashes <= 6 {
        let rest = &line[hashes..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return rest.trim_start();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn slide(text: &str) -> String {
        format!(
            "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            text
        )
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("Plan.PDF").as_deref(), Some("pdf"));
        assert_eq!(detect_format("notes.tar.md").as_deref(), Some("md"));
        assert_eq!(detect_format("README"), None);
    }

    #[test]
    fn test_registry_aliases() {
        let registry = ExtractorRegistry::with_builtins();
        assert_eq!(registry.resolve("HTM"), Some("html"));
        assert_eq!(registry.resolve(".markdown"), Some("md"));
        assert_eq!(registry.resolve("xlsx"), None);
        assert_eq!(
            registry.formats(),
            vec!["docx", "html", "md", "pdf", "pptx", "txt"]
        );
    }

    #[test]
    fn test_unsupported_format() {
        let registry = ExtractorRegistry::with_builtins();
        let err = load(&registry, b"a,b", "sheet.xlsx", None).unwrap_err();
        assert_eq!(err, Error::UnsupportedFormat("xlsx".to_string()));
        let err = load(&registry, b"x", "noext", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_txt_normalized() {
        let registry = ExtractorRegistry::with_builtins();
        let raw = "\u{feff}First   line\r\nstill first\r\n\r\n\r\n  Second\t para  ";
        let loaded = load(&registry, raw.as_bytes(), "a.txt", None).unwrap();
        assert_eq!(loaded.document.body, "First line\nstill first\n\nSecond para");
        assert_eq!(loaded.segments.len(), 2);
        assert_eq!(loaded.document.format, "txt");
        assert_eq!(loaded.document.byte_size, raw.len() as u64);
        assert_eq!(loaded.document.content_hash.len(), 64);
    }

    #[test]
    fn test_txt_invalid_utf8_is_corrupt() {
        let registry = ExtractorRegistry::with_builtins();
        let err = load(&registry, &[0x66, 0xff, 0xfe], "a.txt", None).unwrap_err();
        assert!(matches!(err, Error::CorruptInput { ref format, .. } if format == "txt"));
    }

    #[test]
    fn test_declared_format_overrides_extension() {
        let registry = ExtractorRegistry::with_builtins();
        let loaded = load(&registry, b"# Title\n\nBody", "upload.bin", Some("markdown")).unwrap();
        assert_eq!(loaded.document.format, "md");
        assert_eq!(loaded.document.body, "Title\n\nBody");
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = "<w:document xmlns:w=\"w\"><w:body>\
            <w:p><w:r><w:t>Content calendars </w:t></w:r><w:r><w:t>matter.</w:t></w:r></w:p>\
            <w:p></w:p>\
            <w:p><w:r><w:t>Align &amp; launch.</w:t></w:r></w:p>\
            </w:body></w:document>";
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let segments = DocxExtractor.extract(&bytes).unwrap();
        assert_eq!(segments, vec!["Content calendars matter.", "Align & launch."]);
    }

    #[test]
    fn test_docx_missing_document_xml() {
        let bytes = zip_with(&[("word/other.xml", "<x/>")]);
        let err = DocxExtractor.extract(&bytes).unwrap_err();
        assert!(matches!(err, Error::CorruptInput { .. }));
    }

    #[test]
    fn test_not_a_zip_is_corrupt() {
        let registry = ExtractorRegistry::with_builtins();
        for name in ["a.docx", "a.pptx"] {
            let err = load(&registry, b"not a zip", name, None).unwrap_err();
            assert_eq!(err.code(), "corrupt_input", "{}", name);
        }
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let s1 = slide("One");
        let s2 = slide("Two");
        let s10 = slide("Ten");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let segments = PptxExtractor.extract(&bytes).unwrap();
        assert_eq!(segments, vec!["One", "Two", "Ten"]);
    }

    #[test]
    fn test_invalid_pdf_is_corrupt() {
        let err = PdfExtractor.extract(b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::CorruptInput { ref format, .. } if format == "pdf"));
    }

    #[test]
    fn test_html_strips_markup() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body>\
            <h1>SEO &amp; Content</h1><script>var x = '<p>';</script>\
            <p>Keyword   research<br>drives&nbsp;topics.</p><!-- hidden --><div>Clusters &#8212; pillars</div>\
            </body></html>";
        let segments = html_segments(html);
        let normalized: Vec<String> = segments.iter().map(|s| normalize_segment(s)).collect();
        assert_eq!(
            normalized,
            vec![
                "SEO & Content",
                "Keyword research\ndrives topics.",
                "Clusters \u{2014} pillars"
            ]
        );
    }

    #[test]
    fn test_html_bare_angle_brackets_are_text() {
        let html = "<p>5 < 6 and 7 > 3</p><p>Budget <= plan</p><p>trailing <</p>";
        let segments = html_segments(html);
        let normalized: Vec<String> = segments.iter().map(|s| normalize_segment(s)).collect();
        assert_eq!(normalized, vec!["5 < 6 and 7 > 3", "Budget <= plan", "trailing <"]);
        assert!(opens_tag("<p>"));
        assert!(opens_tag("</div>"));
        assert!(!opens_tag("< 6"));
        assert!(!opens_tag("<"));
    }

    #[test]
    fn test_unknown_entity_kept() {
        assert_eq!(decode_entities("AT&T &bogus; &lt;b&gt;"), "AT&T &bogus; <b>");
    }

    #[test]
    fn test_markdown_markers() {
        assert_eq!(strip_markdown_markers("## Heading"), "Heading");
        assert_eq!(strip_markdown_markers("> > quoted"), "quoted");
        assert_eq!(strip_markdown_markers("#hashtag"), "#hashtag");
    }

    #[test]
    fn test_custom_extractor_registration() {
        struct Upper;
        impl Extractor for Upper {
            fn format(&self) -> &str {
                "shout"
            }
            fn extract(&self, bytes: &[u8]) -> Result<Vec<String>> {
                Ok(vec![String::from_utf8_lossy(bytes).to_uppercase()])
            }
        }
        let mut registry = ExtractorRegistry::with_builtins();
        registry.register(Arc::new(Upper), &["yell"]);
        let loaded = load(&registry, b"quiet", "x.yell", None).unwrap();
        assert_eq!(loaded.document.body, "QUIET");
        assert_eq!(loaded.document.format, "shout");
    }
}
