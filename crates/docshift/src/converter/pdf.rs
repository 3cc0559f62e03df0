//! PDF reading and writing shared by the converters.

use std::path::Path;

use lopdf::{dictionary, Document, Object, Stream};

use crate::error::ConversionError;

const LINES_PER_PAGE: usize = 50;
const TOP_BASELINE: i64 = 742;
const LINE_HEIGHT: i64 = 14;

/// Extracts the text of every page, one line per text line, pages in order.
pub fn extract_lines(path: &Path) -> Result<Vec<String>, ConversionError> {
    let _span = tracing::info_span!("converter.pdf_extract").entered();

    let bytes = std::fs::read(path).map_err(|e| ConversionError::ReadDocument {
        path: path.to_path_buf(),
        source: e,
    })?;
    let doc = Document::load_mem(&bytes)
        .map_err(|e| ConversionError::Pdf(format!("Failed to load PDF: {}", e)))?;

    let mut lines = Vec::new();
    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(page_text) => lines.extend(page_text.lines().map(|l| l.trim_end().to_string())),
            Err(e) => log::debug!("Skipping unreadable page {}: {}", page_num, e),
        }
    }
    Ok(lines)
}

/// Lays `lines` out as Helvetica text, 50 lines per US-letter page.
pub fn render_text_pdf(lines: &[String]) -> Result<Vec<u8>, ConversionError> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    // An empty document still gets one blank page.
    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![lines]
    } else {
        lines.chunks(LINES_PER_PAGE).collect()
    };

    let mut page_ids = Vec::with_capacity(chunks.len());
    for page_lines in chunks {
        let content = format_text_for_pdf(page_lines);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ConversionError::Pdf(e.to_string()))?;
    Ok(buffer)
}

/// One text object per line so extraction reads the lines back separately.
fn format_text_for_pdf(lines: &[String]) -> String {
    let mut content = String::new();
    for (i, line) in lines.iter().enumerate() {
        let y = TOP_BASELINE - (i as i64) * LINE_HEIGHT;
        content.push_str(&format!(
            "BT\n/F1 11 Tf\n50 {} Td\n({}) Tj\nET\n",
            y,
            escape_pdf_string(line)
        ));
    }
    content
}

/// Escapes PDF string delimiters; non-ASCII and control characters become spaces.
fn escape_pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_control() => out.push(c),
            _ => out.push(' '),
        }
    }
    out
}
