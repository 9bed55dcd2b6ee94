//! Text extraction per file type.
//!
//! [`content_type_for`] maps a file extension to a content type;
//! [`extract_text`] turns the file's bytes into UTF-8 text for that type.
//! Plain-text types are decoded directly, PDFs go through `pdf-extract`,
//! and DOCX files are read as a ZIP archive whose `word/document.xml`
//! text runs are concatenated, one line per paragraph.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Bound on the decompressed size of `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "rst", "csv", "tsv", "json", "xml", "tex", "log", "yaml", "yml", "toml",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no text handler for content type {0}")]
    UnsupportedContentType(String),
    #[error("file is not valid UTF-8 text")]
    NotUtf8,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Content type for a path, by extension. `None` when no handler exists.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "html" | "htm" => Some(MIME_HTML),
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        e if PLAIN_TEXT_EXTENSIONS.contains(&e) => Some(MIME_TEXT),
        _ => None,
    }
}

pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN | MIME_HTML => String::from_utf8(bytes.to_vec())
            .map_err(|_| ExtractError::NotUtf8),
        MIME_PDF => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        MIME_DOCX => extract_docx(bytes),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    paragraphs_from_document_xml(&xml)
}

/// Collect `w:t` text runs, ending each `w:p` paragraph with a newline.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::Text(t)) if in_text_run => {
                let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
