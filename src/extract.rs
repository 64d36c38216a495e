//! Page-oriented text extraction for uploaded documents.
//!
//! Supported content types: PDF (one page per PDF page), plain text, and
//! Word-processing OOXML (`.docx`, a single page with one line per
//! paragraph). Extraction never panics; unreadable content is reported as an
//! [`ExtractError`] and unsupported types produce no pages.

use std::io::Read;
use std::path::Path;

use multi_kb_rag_core::models::PageText;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Every content type the extractor understands.
pub const SUPPORTED_TYPES: [&str; 3] = [MIME_PDF, MIME_TEXT, MIME_DOCX];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Turns raw file bytes into ordered page texts.
pub trait TextExtractor: Send + Sync {
    fn supports(&self, content_type: &str) -> bool;

    /// Extract pages in document order. Unsupported content types yield an
    /// empty list.
    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<Vec<PageText>, ExtractError>;
}

/// The built-in PDF / text / DOCX extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn supports(&self, content_type: &str) -> bool {
        SUPPORTED_TYPES.contains(&base_type(content_type).as_str())
    }

    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<Vec<PageText>, ExtractError> {
        match extract_pages(bytes, content_type) {
            Err(ExtractError::UnsupportedContentType(_)) => Ok(Vec::new()),
            other => other,
        }
    }
}

/// Extract pages, rejecting unsupported content types with an error.
///
/// Pages with no visible text are dropped; `page_number` keeps the original
/// 1-based position.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<PageText>, ExtractError> {
    let raw_pages = match base_type(content_type).as_str() {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_TEXT => vec![String::from_utf8_lossy(bytes).into_owned()],
        MIME_DOCX => vec![extract_docx(bytes)?],
        other => return Err(ExtractError::UnsupportedContentType(other.to_string())),
    };

    Ok(raw_pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageText {
            page_number: i as u32 + 1,
            text: text.trim().to_string(),
        })
        .collect())
}

/// Guess the content type from a file extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" | "text" | "md" => Some(MIME_TEXT),
        "docx" => Some(MIME_DOCX),
        _ => None,
    }
}

/// Lowercased type without parameters such as `; charset=utf-8`.
fn base_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
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
    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, one output line per `w:p` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = std::mem::take(&mut current);
                    if !line.trim().is_empty() {
                        paragraphs.push(line);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => current.push('\t'),
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", opts).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn plain_text_is_one_page() {
        let pages = extract_pages(b"Standard filing fee is 500 baht.", MIME_TEXT).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].text, "Standard filing fee is 500 baht.");
    }

    #[test]
    fn charset_parameter_is_ignored() {
        let pages = extract_pages(b"hi", "text/plain; charset=utf-8").unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn content_type_case_is_ignored() {
        assert!(DocumentExtractor.supports("Text/Plain; charset=UTF-8"));
        assert!(DocumentExtractor.supports("APPLICATION/PDF"));
        let pages = extract_pages(b"hi", "TEXT/PLAIN").unwrap();
        assert_eq!(pages[0].text, "hi");
    }

    #[test]
    fn blank_text_has_no_pages() {
        assert!(extract_pages(b"  \n ", MIME_TEXT).unwrap().is_empty());
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_pages(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn extractor_yields_no_pages_for_unsupported_type() {
        let ex = DocumentExtractor;
        assert!(!ex.supports("image/png"));
        assert!(ex.extract(b"foo", "image/png").unwrap().is_empty());
        assert!(ex.supports(MIME_DOCX));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pages(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_pages(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Firearms </w:t></w:r><w:r><w:t>Act</w:t></w:r></w:p>
    <w:p><w:r><w:t>Fee &amp; penalties</w:t></w:r></w:p>
    <w:p></w:p>
  </w:body>
</w:document>"#;
        let pages = extract_pages(&docx_with(xml), MIME_DOCX).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "Firearms Act\nFee & penalties");
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for_path(Path::new("a/B.PDF")), Some(MIME_PDF));
        assert_eq!(content_type_for_path(Path::new("notes.txt")), Some(MIME_TEXT));
        assert_eq!(content_type_for_path(Path::new("x.docx")), Some(MIME_DOCX));
        assert_eq!(content_type_for_path(Path::new("x.xlsx")), None);
        assert_eq!(content_type_for_path(Path::new("README")), None);
    }
}
