//! End-to-end runs with the real converters, plus the upload, listing and
//! download boundaries.

mod common;

use std::path::Path;

use common::*;
use docshift::converter::docx::read_paragraphs;
use docshift::converter::pdf::extract_lines;
use docshift::converter::xlsx::read_rows;
use docshift::{
    generate_csrf_token, verify_csrf, ConversionKind, ConverterRegistry, JobQuery, JobStatus,
    ServiceError,
};

const OWNER: i64 = 7;

/// Converts `job_id` to `target` and returns the output file's bytes.
fn convert(harness: &TestHarness, job_id: i64, target: &str) -> Vec<u8> {
    harness.service.submit_conversion(job_id, OWNER, target).unwrap();
    let view = harness.wait_for_terminal(job_id, OWNER);
    assert_eq!(view.status, JobStatus::Completed, "{:?}", view.error_message);
    let file = harness.service.open_output(job_id, OWNER).unwrap();
    std::fs::read(&file.path).unwrap()
}

fn text_of_pdf(bytes: &[u8]) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.pdf");
    std::fs::write(&path, bytes).unwrap();
    extract_lines(&path).unwrap().join("\n")
}

#[test]
fn test_pdf_to_word_and_back() {
    let harness = TestHarness::with_converters(ConverterRegistry::standard());
    let job = harness
        .service
        .upload(
            OWNER,
            "minutes.pdf",
            None,
            &TestHarness::pdf_bytes(&["Board minutes", "Budget approved"]),
            ConversionKind::PdfToWord,
        )
        .unwrap();
    assert_eq!(job.mime_type.as_deref(), Some("application/pdf"));

    let docx = convert(&harness, job.id, "docx");
    let output = harness.job(job.id).unwrap().output_path.unwrap();
    let paragraphs = read_paragraphs(&output).unwrap().join("\n");
    assert!(paragraphs.contains("Board minutes"));
    assert!(paragraphs.contains("Budget approved"));

    let word = harness
        .service
        .upload(OWNER, "minutes.docx", None, &docx, ConversionKind::WordToPdf)
        .unwrap();
    let pdf = convert(&harness, word.id, "pdf");
    let text = text_of_pdf(&pdf);
    assert!(text.contains("Board minutes"));
    assert!(text.contains("Budget approved"));
}

#[test]
fn test_pdf_to_excel_and_back() {
    let harness = TestHarness::with_converters(ConverterRegistry::standard());
    let job = harness
        .service
        .upload(
            OWNER,
            "ledger.pdf",
            Some("application/pdf"),
            &TestHarness::pdf_bytes(&["Item    Amount", "Paper    42.5"]),
            ConversionKind::PdfToExcel,
        )
        .unwrap();

    let xlsx = convert(&harness, job.id, "xlsx");
    let output = harness.job(job.id).unwrap().output_path.unwrap();
    let cells: Vec<String> = read_rows(&output).unwrap().into_iter().flatten().collect();
    assert!(cells.iter().any(|c| c.contains("Paper")));
    assert!(cells.iter().any(|c| c.contains("42.5")));

    let sheet = harness
        .service
        .upload(OWNER, "ledger.xlsx", None, &xlsx, ConversionKind::ExcelToPdf)
        .unwrap();
    let text = text_of_pdf(&convert(&harness, sheet.id, "pdf"));
    assert!(text.contains("Paper"));
}

#[test]
fn test_corrupt_document_fails_job() {
    let harness = TestHarness::with_converters(ConverterRegistry::standard());
    let job = harness
        .service
        .upload(OWNER, "broken.docx", None, b"PK not really", ConversionKind::WordToPdf)
        .unwrap();

    harness.service.submit_conversion(job.id, OWNER, "pdf").unwrap();
    let view = harness.wait_for_terminal(job.id, OWNER);
    assert_eq!(view.status, JobStatus::Failed);
    assert!(!view.error_message.unwrap().is_empty());
    assert_eq!(harness.converted_files(OWNER), 0);
}

#[test]
fn test_upload_validation() {
    let harness = TestHarness::build(ok_converters(), |config| {
        config.storage.max_upload_bytes = 16;
    });
    let pdf = ConversionKind::PdfToWord;

    let cases: [(&str, &[u8], ConversionKind); 5] = [
        ("", b"%PDF", pdf),
        ("a.pdf", b"", pdf),
        ("a.pdf", &[b'x'; 17], pdf),
        ("notes.txt", b"hello", pdf),
        ("sheet.xlsx", b"PK", pdf),
    ];
    for (name, bytes, kind) in cases {
        let err = harness.service.upload(OWNER, name, None, bytes, kind).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)), "{}: {:?}", name, err);
    }
    assert_eq!(harness.service.stats(OWNER).unwrap().total, 0);
    assert!(!harness.upload_dir.join(OWNER.to_string()).join("originals").exists()
        || std::fs::read_dir(harness.upload_dir.join(OWNER.to_string()).join("originals"))
            .unwrap()
            .next()
            .is_none());
}

#[test]
fn test_upload_sanitizes_and_confines_name() {
    let harness = TestHarness::with_converters(ok_converters());
    let job = harness
        .service
        .upload(
            OWNER,
            "../../etc/Quarterly Report (final).pdf",
            None,
            b"%PDF-1.5",
            ConversionKind::PdfToExcel,
        )
        .unwrap();

    assert_eq!(job.original_filename, "Quarterly_Report_final_.pdf");
    assert!(job.source_path.starts_with(harness.upload_dir.join("7").join("originals")));
    assert!(job.stored_filename.ends_with("_Quarterly_Report_final_.pdf"));
    assert_eq!(job.file_size, 8);
}

#[test]
fn test_declared_mime_cannot_override_extension() {
    let harness = TestHarness::with_converters(ok_converters());
    let sheet_mime = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    let upload = |name: &str| {
        harness
            .service
            .upload(OWNER, name, Some(sheet_mime), b"%PDF-1.5", ConversionKind::PdfToWord)
            .unwrap()
    };

    let job = upload("report.pdf");
    assert_eq!(job.mime_type.as_deref(), Some("application/pdf"));
    let accepted = harness.service.submit_conversion(job.id, OWNER, "docx").unwrap();
    assert_eq!(accepted.status, JobStatus::Processing);
    assert_eq!(harness.job(job.id).unwrap().conversion_kind, ConversionKind::PdfToWord);
    assert_eq!(harness.wait_for_terminal(job.id, OWNER).status, JobStatus::Completed);

    let other = upload("other.pdf");
    let err = harness.service.submit_conversion(other.id, OWNER, "pdf").unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)), "{:?}", err);
    assert_eq!(harness.job(other.id).unwrap().status, JobStatus::Uploaded);
}

#[test]
fn test_legacy_word_upload_maps_to_pdf() {
    let harness = TestHarness::with_converters(ok_converters());
    let job = harness
        .service
        .upload(OWNER, "old.doc", None, b"\xD0\xCF\x11\xE0", ConversionKind::WordToPdf)
        .unwrap();
    assert!(job.mime_type.as_deref().unwrap().contains("msword"));

    let err = harness.service.submit_conversion(job.id, OWNER, "docx").unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert_eq!(
        harness.service.submit_conversion(job.id, OWNER, "PDF").unwrap().status,
        JobStatus::Processing
    );
}

#[test]
fn test_listing_pagination_and_search() {
    let harness = TestHarness::with_converters(failing_converters("bad"));
    for i in 0..7 {
        harness.upload_pdf(OWNER, &format!("invoice-{}.pdf", i));
    }
    harness.upload_pdf(OWNER, "Contract.pdf");
    harness.upload_pdf(99, "invoice-other-owner.pdf");

    let page = harness
        .service
        .list_jobs(OWNER, JobQuery { page_size: 3, ..JobQuery::default() })
        .unwrap();
    assert_eq!(page.total, 8);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.jobs.len(), 3);
    assert_eq!(page.jobs[0].original_filename, "Contract.pdf");

    let last = harness
        .service
        .list_jobs(OWNER, JobQuery { page: 3, page_size: 3, ..JobQuery::default() })
        .unwrap();
    assert_eq!(last.jobs.len(), 2);

    let search = harness
        .service
        .list_jobs(OWNER, JobQuery { search: Some("INVOICE".to_string()), ..JobQuery::default() })
        .unwrap();
    assert_eq!(search.total, 7);
    assert!(search.jobs.iter().all(|j| j.owner_id == OWNER));

    let bad = harness
        .service
        .list_jobs(OWNER, JobQuery { search: Some("100%".to_string()), ..JobQuery::default() })
        .unwrap_err();
    assert!(matches!(bad, ServiceError::Validation(_)));
}

#[test]
fn test_listing_by_status_and_stats() {
    let harness = TestHarness::with_converters(failing_converters("bad"));
    let failed = harness.upload_pdf(OWNER, "a.pdf");
    harness.upload_pdf(OWNER, "b.pdf");
    harness.service.submit_conversion(failed.id, OWNER, "docx").unwrap();
    harness.wait_for_terminal(failed.id, OWNER);

    let page = harness
        .service
        .list_jobs(OWNER, JobQuery { status: Some(JobStatus::Failed), ..JobQuery::default() })
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.jobs[0].id, failed.id);

    let stats = harness.service.stats(OWNER).unwrap();
    assert_eq!((stats.total, stats.uploaded, stats.failed), (2, 1, 1));
    assert_eq!((stats.processing, stats.completed), (0, 0));
    assert_eq!(harness.service.stats(12345).unwrap().total, 0);
}

#[test]
fn test_open_output_requires_completion() {
    let harness = TestHarness::with_converters(ok_converters());
    let job = harness.upload_pdf(OWNER, "report.pdf");
    let err = harness.service.open_output(job.id, OWNER).unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let done = harness.completed_job(OWNER, "Annual \"Q4\".pdf");
    let file = harness.service.open_output(done.id, OWNER).unwrap();
    assert_eq!(file.download_name, "Annual_Q4_.docx");
    assert!(file.path.starts_with(&harness.upload_dir));

    // A vanished output is reported as missing, not streamed.
    std::fs::remove_file(&file.path).unwrap();
    assert!(matches!(
        harness.service.open_output(done.id, OWNER),
        Err(ServiceError::NotFound(_))
    ));
}

#[test]
fn test_job_serialization_hides_paths() {
    let harness = TestHarness::with_converters(ok_converters());
    let done = harness.completed_job(OWNER, "report.pdf");
    let json = serde_json::to_value(&done).unwrap();

    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["conversionKind"], "PDF_TO_WORD");
    assert!(json.get("sourcePath").is_none());
    assert!(json.get("outputPath").is_none());
    let text = json.to_string();
    assert!(!text.contains(harness.upload_dir.to_string_lossy().as_ref()));
    assert!(!Path::new(json["outputFilename"].as_str().unwrap()).is_absolute());
}

#[test]
fn test_csrf_round_trip() {
    let secret = generate_csrf_token().unwrap();
    let other = generate_csrf_token().unwrap();
    use secrecy::ExposeSecret;

    assert!(verify_csrf(&secret, secret.expose_secret()));
    assert!(!verify_csrf(&secret, other.expose_secret()));
    assert!(!verify_csrf(&secret, ""));
    assert!(!verify_csrf(&secret, &secret.expose_secret()[..20]));
}
