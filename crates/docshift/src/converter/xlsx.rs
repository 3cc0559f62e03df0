use std::path::Path;
use std::sync::LazyLock;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use super::docx::strip_xml_invalid;
use super::{open_package, pdf, read_part, write_output, write_package, Converter};
use crate::error::ConversionError;

static RE_CELL_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t|\s{2,}").unwrap());

const CELL_JOINER: &str = " | ";
const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Turns each PDF text line into a spreadsheet row. Tabs and runs of two or
/// more spaces separate cells.
pub struct PdfToXlsx;

impl Converter for PdfToXlsx {
    fn convert(&self, source: &Path, dest: &Path) -> Result<(), ConversionError> {
        let rows: Vec<Vec<String>> = pdf::extract_lines(source)?
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| split_cells(line))
            .collect();
        let bytes = build_xlsx(&rows).map_err(ConversionError::Xlsx)?;
        write_output(dest, &bytes)
    }
}

/// Renders the first worksheet as a text PDF, one row per line.
pub struct XlsxToPdf;

impl Converter for XlsxToPdf {
    fn convert(&self, source: &Path, dest: &Path) -> Result<(), ConversionError> {
        let lines: Vec<String> = read_rows(source)?
            .into_iter()
            .map(|row| row.join(CELL_JOINER))
            .collect();
        let bytes = pdf::render_text_pdf(&lines)?;
        write_output(dest, &bytes)
    }
}

fn split_cells(line: &str) -> Vec<String> {
    RE_CELL_SEPARATOR
        .split(line.trim())
        .map(|cell| cell.trim().to_string())
        .collect()
}

/// Reads the first worksheet as rows of display strings.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, ConversionError> {
    let _span = tracing::info_span!("converter.xlsx_read").entered();

    let mut archive = open_package(path).map_err(ConversionError::Xlsx)?;
    let shared = match read_part(&mut archive, "xl/sharedStrings.xml").map_err(ConversionError::Xlsx)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet = read_part(&mut archive, FIRST_SHEET)
        .map_err(ConversionError::Xlsx)?
        .ok_or_else(|| ConversionError::Xlsx(format!("Workbook has no {}", FIRST_SHEET)))?;

    parse_sheet(&sheet, &shared)
}

fn xml_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::Xlsx(format!("XML parsing error: {}", e))
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, ConversionError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(e) if in_text => current.push_str(&e.unescape().map_err(xml_error)?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

fn cell_type(e: &BytesStart<'_>) -> Option<Vec<u8>> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"t")
        .map(|a| a.value.into_owned())
}

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, ConversionError> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind: Option<Vec<u8>> = None;
    let mut value = String::new();
    let mut capturing = false;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    kind = cell_type(e);
                    value.clear();
                }
                b"v" | b"t" => capturing = true,
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => row.push(String::new()),
            Event::Empty(ref e) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Event::End(ref e) => match e.local_name().as_ref() {
                b"v" | b"t" => capturing = false,
                b"c" => {
                    let raw = std::mem::take(&mut value);
                    let cell = if kind.as_deref() == Some(b"s") {
                        raw.trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .ok_or_else(|| {
                                ConversionError::Xlsx(format!("Bad shared string index '{}'", raw))
                            })?
                    } else {
                        raw
                    };
                    row.push(cell);
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Event::Text(e) if capturing => value.push_str(&e.unescape().map_err(xml_error)?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

/// Spreadsheet column name for a zero-based index: 0 -> A, 26 -> AA.
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn build_xlsx(rows: &[Vec<String>]) -> Result<Vec<u8>, String> {
    let mut data = String::new();
    for (r, row) in rows.iter().enumerate() {
        let row_num = r + 1;
        data.push_str(&format!(r#"<row r="{}">"#, row_num));
        for (c, cell) in row.iter().enumerate() {
            let reference = format!("{}{}", column_name(c), row_num);
            if !cell.is_empty() && cell.parse::<f64>().is_ok_and(f64::is_finite) {
                data.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, reference, cell));
            } else {
                data.push_str(&format!(
                    r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    reference,
                    escape(strip_xml_invalid(cell).as_str())
                ));
            }
        }
        data.push_str("</row>");
    }
    let sheet = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
        data
    );

    write_package(&[
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", WORKBOOK.to_string()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        (FIRST_SHEET, sheet),
    ])
}
