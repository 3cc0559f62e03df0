//! Document converters, one per [`ConversionKind`].
//!
//! A converter reads a source file and writes the converted document to a
//! destination path chosen by the caller. The orchestrator treats them as
//! opaque: any `Err` (or panic) becomes a failed job.

pub mod docx;
pub mod pdf;
pub mod xlsx;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ConversionError;
use crate::model::ConversionKind;

pub use docx::{DocxToPdf, PdfToDocx};
pub use xlsx::{PdfToXlsx, XlsxToPdf};

pub trait Converter: Send + Sync {
    fn convert(&self, source: &Path, dest: &Path) -> Result<(), ConversionError>;
}

impl<F> Converter for F
where
    F: Fn(&Path, &Path) -> Result<(), ConversionError> + Send + Sync,
{
    fn convert(&self, source: &Path, dest: &Path) -> Result<(), ConversionError> {
        self(source, dest)
    }
}

/// Maps each conversion kind to the converter that performs it.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<ConversionKind, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in converter for all four kinds.
    pub fn standard() -> Self {
        Self::new()
            .with(ConversionKind::PdfToWord, Arc::new(PdfToDocx))
            .with(ConversionKind::WordToPdf, Arc::new(DocxToPdf))
            .with(ConversionKind::PdfToExcel, Arc::new(PdfToXlsx))
            .with(ConversionKind::ExcelToPdf, Arc::new(XlsxToPdf))
    }

    /// Same converter for every kind.
    pub fn uniform(converter: Arc<dyn Converter>) -> Self {
        ConversionKind::ALL
            .into_iter()
            .fold(Self::new(), |registry, kind| registry.with(kind, Arc::clone(&converter)))
    }

    pub fn with(mut self, kind: ConversionKind, converter: Arc<dyn Converter>) -> Self {
        self.converters.insert(kind, converter);
        self
    }

    pub fn get(&self, kind: ConversionKind) -> Result<Arc<dyn Converter>, ConversionError> {
        self.converters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConversionError::NoConverter(kind.to_string()))
    }
}

/// Writes converter output, refusing to replace an existing file.
pub(crate) fn write_output(dest: &Path, bytes: &[u8]) -> Result<(), ConversionError> {
    let write_err = |source| ConversionError::WriteDocument {
        path: dest.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.sync_all().map_err(write_err)
}

pub(crate) fn open_package(path: &Path) -> Result<ZipArchive<File>, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open file: {}", e))?;
    ZipArchive::new(file).map_err(|e| format!("Not an Office Open XML package: {}", e))
}

pub(crate) fn read_part(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>, String> {
    use std::io::Read;

    let mut part = match archive.by_name(name) {
        Ok(part) => part,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("Failed to open {}: {}", name, e)),
    };
    let mut content = String::new();
    part.read_to_string(&mut content)
        .map_err(|e| format!("Failed to read {}: {}", name, e))?;
    Ok(Some(content))
}

/// Packs `(part name, xml)` pairs into a deflated OOXML zip.
pub(crate) fn write_package(parts: &[(&str, String)]) -> Result<Vec<u8>, String> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in parts {
        writer
            .start_file(*name, options)
            .map_err(|e| format!("Failed to start {}: {}", name, e))?;
        writer
            .write_all(content.as_bytes())
            .map_err(|e| format!("Failed to write {}: {}", name, e))?;
    }

    writer
        .finish()
        .map(Cursor::into_inner)
        .map_err(|e| format!("Failed to finish package: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_all_kinds() {
        let registry = ConverterRegistry::standard();
        for kind in ConversionKind::ALL {
            assert!(registry.get(kind).is_ok(), "{}", kind);
        }
    }

    #[test]
    fn test_missing_converter() {
        let registry = ConverterRegistry::new();
        assert!(matches!(
            registry.get(ConversionKind::PdfToWord),
            Err(ConversionError::NoConverter(_))
        ));
    }

    #[test]
    fn test_closure_converter() {
        let registry = ConverterRegistry::uniform(Arc::new(|_: &Path, dest: &Path| {
            write_output(dest, b"ok")
        }));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        registry
            .get(ConversionKind::ExcelToPdf)
            .unwrap()
            .convert(Path::new("/unused"), &dest)
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
    }

    #[test]
    fn test_write_output_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        write_output(&dest, b"first").unwrap();
        assert!(matches!(
            write_output(&dest, b"second"),
            Err(ConversionError::WriteDocument { .. })
        ));
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");
    }

    #[test]
    fn test_package_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.zip");
        let bytes = write_package(&[("a/b.xml", "<x/>".to_string())]).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let mut archive = open_package(&path).unwrap();
        assert_eq!(read_part(&mut archive, "a/b.xml").unwrap().as_deref(), Some("<x/>"));
        assert_eq!(read_part(&mut archive, "missing.xml").unwrap(), None);
    }
}
