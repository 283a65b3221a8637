//! DOCX text extraction.
//!
//! A DOCX file is a zip archive; the body lives in `word/document.xml`.
//! Text runs (`w:t`) are concatenated per paragraph (`w:p`), empty paragraphs
//! are dropped, and paragraphs are joined with newlines in document order.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::ExtractionError;

/// Archive entry holding the main document body.
pub const DOCUMENT_ENTRY: &str = "word/document.xml";

/// Extract paragraph text from a DOCX payload.
pub fn extract_text(payload: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(payload))?;
    let mut xml = String::new();
    match archive.by_name(DOCUMENT_ENTRY) {
        Ok(mut entry) => {
            entry.read_to_string(&mut xml)?;
        }
        Err(ZipError::FileNotFound) => {
            return Err(ExtractionError::MissingEntry(DOCUMENT_ENTRY.to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    paragraphs_from_xml(&xml)
}

/// Collect `w:t` runs grouped by `w:p` from WordprocessingML markup.
pub fn paragraphs_from_xml(xml: &str) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    // Paragraphs can nest (text boxes, table cells inside shapes).
    let mut open: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => open.push(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(text) = open.pop()
                        && !text.is_empty()
                    {
                        paragraphs.push(text);
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(t) if in_text => {
                if let Some(current) = open.last_mut() {
                    current.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) if in_text => {
                if let Some(current) = open.last_mut() {
                    current.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}
