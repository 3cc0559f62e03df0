use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{open_package, pdf, read_part, write_output, write_package, Converter};
use crate::error::ConversionError;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Extracts PDF text into a Word document, one paragraph per line.
pub struct PdfToDocx;

impl Converter for PdfToDocx {
    fn convert(&self, source: &Path, dest: &Path) -> Result<(), ConversionError> {
        let lines = pdf::extract_lines(source)?;
        let bytes = build_docx(&lines).map_err(ConversionError::Docx)?;
        write_output(dest, &bytes)
    }
}

/// Renders the paragraphs of a Word document as a text PDF.
pub struct DocxToPdf;

impl Converter for DocxToPdf {
    fn convert(&self, source: &Path, dest: &Path) -> Result<(), ConversionError> {
        let paragraphs = read_paragraphs(source)?;
        let bytes = pdf::render_text_pdf(&paragraphs)?;
        write_output(dest, &bytes)
    }
}

pub fn read_paragraphs(path: &Path) -> Result<Vec<String>, ConversionError> {
    let _span = tracing::info_span!("converter.docx_read").entered();

    let mut archive = open_package(path).map_err(ConversionError::Docx)?;
    let xml = read_part(&mut archive, "word/document.xml")
        .map_err(ConversionError::Docx)?
        .ok_or_else(|| ConversionError::Docx("Package has no word/document.xml".to_string()))?;

    parse_document_xml(&xml)
}

fn parse_document_xml(xml: &str) -> Result<Vec<String>, ConversionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_element = false;
    let mut in_paragraph = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = true,
                b"p" => {
                    in_paragraph = true;
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"p" if !in_paragraph => paragraphs.push(String::new()),
                b"tab" | b"br" if in_paragraph => current.push(' '),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" if in_paragraph => {
                    paragraphs.push(std::mem::take(&mut current));
                    in_paragraph = false;
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    let decoded = e
                        .unescape()
                        .map_err(|e| ConversionError::Docx(format!("Bad text content: {}", e)))?;
                    current.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ConversionError::Docx(format!("XML parsing error: {}", e)));
            }
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn build_docx(paragraphs: &[String]) -> Result<Vec<u8>, String> {
    let mut body = String::new();
    for paragraph in paragraphs {
        if paragraph.is_empty() {
            body.push_str("<w:p/>");
        } else {
            body.push_str(r#"<w:p><w:r><w:t xml:space="preserve">"#);
            body.push_str(&escape(strip_xml_invalid(paragraph).as_str()));
            body.push_str("</w:t></w:r></w:p>");
        }
    }
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{}"><w:body>{}</w:body></w:document>"#,
        WORD_NS, body
    );

    write_package(&[
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("word/document.xml", document),
    ])
}

/// Drops control characters XML 1.0 cannot carry.
pub(crate) fn strip_xml_invalid(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
