//! Plain-text extraction for uploaded documents.
//!
//! The format is chosen from the file name's extension (case-insensitive):
//!
//! | Extension | Strategy |
//! |-----------|----------|
//! | `.pdf`  | text per page, pages joined with `\n`; unreadable pages become `""` |
//! | `.docx` | body paragraph texts joined with `\n` |
//! | `.txt`  | whole file decoded as UTF-8 |
//!
//! Anything else fails with [`ExtractError::UnsupportedFormat`] and yields
//! no partial output.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("text file is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Txt,
}

impl FileKind {
    /// Resolves the kind from a file name's extension.
    pub fn from_filename(name: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        if ext.eq_ignore_ascii_case("pdf") {
            Ok(FileKind::Pdf)
        } else if ext.eq_ignore_ascii_case("docx") {
            Ok(FileKind::Docx)
        } else if ext.eq_ignore_ascii_case("txt") {
            Ok(FileKind::Txt)
        } else if ext.is_empty() {
            Err(ExtractError::UnsupportedFormat(name.to_string()))
        } else {
            Err(ExtractError::UnsupportedFormat(format!(".{}", ext)))
        }
    }
}

/// Extracts plain text from an uploaded file's bytes.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let kind = FileKind::from_filename(filename)?;
    debug!(filename, ?kind, bytes = bytes.len(), "extracting text");
    match kind {
        FileKind::Pdf => extract_pdf(bytes),
        FileKind::Docx => extract_docx(bytes),
        FileKind::Txt => extract_txt(bytes),
    }
}

/// Reads a file from disk and extracts its text.
///
/// The extension is checked before the file is opened.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    FileKind::from_filename(name)?;
    let bytes = std::fs::read(path)?;
    extract_text(name, &bytes)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let pages: Vec<String> = doc
        .get_pages()
        .keys()
        .map(|&page| match doc.extract_text(&[page]) {
            Ok(text) => text,
            Err(e) => {
                warn!(page, error = %e, "PDF page has no extractable text");
                String::new()
            }
        })
        .collect();

    Ok(pages.join("\n"))
}

fn extract_txt(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    Ok(docx_paragraphs(&doc_xml)?.join("\n"))
}

/// Collects the text of each top-level body paragraph (`w:p`).
///
/// Paragraphs nested in tables are skipped. Runs are concatenated; `w:tab`
/// and `w:br` become `\t` and `\n`.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut table_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => table_depth += 1,
                b"p" if table_depth == 0 => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" if table_depth == 0 => paragraphs.push(String::new()),
                b"tab" => {
                    if let Some(p) = current.as_mut() {
                        p.push('\t');
                    }
                }
                b"br" | b"cr" => {
                    if let Some(p) = current.as_mut() {
                        p.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(p) = current.as_mut() {
                    let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                    p.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                b"p" if table_depth == 0 => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}
