use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// File extensions accepted at upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "xlsx", "xls"];

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Broad family of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    Pdf,
    WordProcessor,
    Spreadsheet,
}

impl SourceFamily {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::WordProcessor),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    /// Classifies a MIME type. Spreadsheet types are checked before word
    /// processor types because both OOXML families contain "officedocument".
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("pdf") {
            Some(Self::Pdf)
        } else if mime.contains("spreadsheet") || mime.contains("excel") {
            Some(Self::Spreadsheet)
        } else if mime.contains("wordprocessing") || mime.contains("msword") {
            Some(Self::WordProcessor)
        } else {
            None
        }
    }
}

/// One of the supported source-to-target conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionKind {
    PdfToWord,
    WordToPdf,
    PdfToExcel,
    ExcelToPdf,
}

impl ConversionKind {
    pub const ALL: [ConversionKind; 4] = [
        Self::PdfToWord,
        Self::WordToPdf,
        Self::PdfToExcel,
        Self::ExcelToPdf,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PdfToWord => "PDF_TO_WORD",
            Self::WordToPdf => "WORD_TO_PDF",
            Self::PdfToExcel => "PDF_TO_EXCEL",
            Self::ExcelToPdf => "EXCEL_TO_PDF",
        }
    }

    pub const fn source_family(&self) -> SourceFamily {
        match self {
            Self::PdfToWord | Self::PdfToExcel => SourceFamily::Pdf,
            Self::WordToPdf => SourceFamily::WordProcessor,
            Self::ExcelToPdf => SourceFamily::Spreadsheet,
        }
    }

    pub const fn target_extension(&self) -> &'static str {
        match self {
            Self::PdfToWord => "docx",
            Self::PdfToExcel => "xlsx",
            Self::WordToPdf | Self::ExcelToPdf => "pdf",
        }
    }

    pub const fn target_mime(&self) -> &'static str {
        match self {
            Self::PdfToWord => DOCX_MIME,
            Self::PdfToExcel => XLSX_MIME,
            Self::WordToPdf | Self::ExcelToPdf => PDF_MIME,
        }
    }

    /// Returns true if a file with `extension` is a valid source for this kind.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        SourceFamily::from_extension(extension) == Some(self.source_family())
    }

    /// Maps a requested target format ("docx", "xlsx", "pdf") onto a kind.
    pub fn from_target(source: SourceFamily, target: &str) -> Option<Self> {
        match (source, target.trim().to_ascii_lowercase().as_str()) {
            (SourceFamily::Pdf, "docx") => Some(Self::PdfToWord),
            (SourceFamily::Pdf, "xlsx") => Some(Self::PdfToExcel),
            (SourceFamily::WordProcessor, "pdf") => Some(Self::WordToPdf),
            (SourceFamily::Spreadsheet, "pdf") => Some(Self::ExcelToPdf),
            _ => None,
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown conversion kind '{}'", s))
    }
}
