//! Text extraction for uploaded documents, keyed by filename extension.
//!
//! Supported formats: PDF (page text), DOCX (paragraph text from
//! `word/document.xml`), ODT (paragraph text from `content.xml`), and plain
//! text/markdown read verbatim. Extraction returns plain UTF-8 text; an
//! unrecognized extension is an error with no side effects.

use std::io::Read;

use crate::error::{Error, Result};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from a document's raw bytes, dispatching on the
/// lowercased extension of `filename`.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<String> {
    match extension(filename).as_deref() {
        Some("pdf") => extract_pdf(bytes),
        Some("docx") => extract_docx(bytes),
        Some("odt") => extract_odt(bytes),
        Some("txt") | Some("md") => extract_plain(bytes),
        _ => Err(Error::UnsupportedFormat(filename.to_string())),
    }
}

/// Whether the filename's extension maps to a known extractor. Used to
/// reject uploads before any side effects happen.
pub fn is_supported(filename: &str) -> bool {
    matches!(
        extension(filename).as_deref(),
        Some("pdf") | Some("docx") | Some("odt") | Some("txt") | Some("md")
    )
}

fn extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Extraction(e.to_string()))
}

fn extract_plain(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Extraction(e.to_string()))
}

fn open_zip_entry(bytes: &[u8], name: &str) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(e.to_string()))?;
    let entry = archive
        .by_name(name)
        .map_err(|_| Error::Extraction(format!("{} not found in archive", name)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| Error::Extraction(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let xml = open_zip_entry(bytes, "word/document.xml")?;
    // DOCX text lives in <w:t> runs grouped under <w:p> paragraphs.
    extract_paragraphs(&xml, b"p", b"t")
}

fn extract_odt(bytes: &[u8]) -> Result<String> {
    let xml = open_zip_entry(bytes, "content.xml")?;
    // ODT paragraphs are <text:p> with character data directly inside.
    extract_paragraphs(&xml, b"p", b"p")
}

/// Walk an OOXML/ODF XML stream collecting character data inside `text_tag`
/// elements, emitting one line per `para_tag` element.
fn extract_paragraphs(xml: &[u8], para_tag: &[u8], text_tag: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut text_depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == text_tag {
                    text_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if text_depth > 0 => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == text_tag && text_depth > 0 {
                    text_depth -= 1;
                }
                if name.as_ref() == para_tag {
                    paragraphs.push(std::mem::take(&mut current));
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with_entry(name: &str, content: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn support_check_matches_dispatch() {
        for name in ["a.pdf", "a.docx", "a.odt", "a.txt", "a.md", "A.PDF"] {
            assert!(is_supported(name), "{} should be supported", name);
        }
        for name in ["a.csv", "a.pptx", "archive.tar.gz", "noext"] {
            assert!(!is_supported(name), "{} should be unsupported", name);
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = extract_text("archive.tar.gz", b"data").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        assert_eq!(extract_text("NOTES.TXT", b"hello").unwrap(), "hello");
    }

    #[test]
    fn plain_text_is_verbatim() {
        let text = "line one\n\nline two";
        assert_eq!(extract_text("a.txt", text.as_bytes()).unwrap(), text);
        assert_eq!(extract_text("a.md", text.as_bytes()).unwrap(), text);
    }

    #[test]
    fn invalid_pdf_is_an_extraction_error() {
        let err = extract_text("broken.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let bytes = zip_with_entry("word/document.xml", doc);
        let text = extract_text("memo.docx", &bytes).unwrap();
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
        let first = text.find("First").unwrap();
        let second = text.find("Second").unwrap();
        assert!(text[first..second].contains('\n'));
    }

    #[test]
    fn odt_paragraphs_become_lines() {
        let doc = r#"<?xml version="1.0"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0"
                         xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0">
  <office:body><office:text>
    <text:p>Opening statement.</text:p>
    <text:p>Closing statement.</text:p>
  </office:text></office:body>
</office:document-content>"#;
        let bytes = zip_with_entry("content.xml", doc);
        let text = extract_text("policy.odt", &bytes).unwrap();
        assert!(text.contains("Opening statement."));
        assert!(text.contains("Closing statement."));
    }

    #[test]
    fn docx_without_document_xml_is_an_error() {
        let bytes = zip_with_entry("other.xml", "<x/>");
        let err = extract_text("memo.docx", &bytes).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
