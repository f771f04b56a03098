mod fixtures;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use blindreview::pdf::{LopdfDocument, LopdfParser, OcrEngine, PageBitmap, PageSource};
use blindreview::redaction::revision_path;
use blindreview::storage::{FileStore, LocalFileStore, MemoryStore, RevisionStore};
use blindreview::types::RevisionKind;
use blindreview::workflow::{generate_unique, ReviewDesk};
use blindreview::{Category, Error, Result, ServiceConfig, TrackingCode};

use fixtures::{build_pdf, submission, test_config, text_pdf, FixturePage, Harness};

async fn page_text(harness: &Harness, path: &str, page: usize) -> String {
    let bytes = harness.files.read(path).await.unwrap();
    LopdfDocument::load(&bytes).unwrap().page_text(page).unwrap()
}

#[tokio::test]
async fn test_blur_then_unblur_restores_the_author() {
    let harness = Harness::new();
    let pdf = text_pdf(&["Jane Doe", "Abstract follows"]);
    let region = LopdfDocument::load(&pdf).unwrap().search_page(0, "Jane Doe").unwrap()[0];
    let code = harness
        .desk
        .submit(submission("Jane Doe, John Roe", "MIT CSAIL", pdf))
        .await
        .unwrap();

    let blurred = harness.desk.blur(code, Category::Authors).await.unwrap();
    assert_eq!(blurred.applied_count, 1);
    assert_eq!(blurred.expected_count, 1);
    assert_eq!(blurred.new_path, revision_path(&format!("papers/{}.pdf", code), code, 2, RevisionKind::Blurred));
    assert_eq!(page_text(&harness, &blurred.new_path, 0).await, "********\nAbstract follows");

    let records = harness.store.redaction_records(code).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, Category::Authors);
    assert_eq!(records[0].page, 0);
    assert_eq!(records[0].region, region);
    assert_eq!(records[0].replacement_text, "********");
    assert_eq!(harness.desk.decrypt_field(&records[0].original_text).unwrap(), "Jane Doe");

    let manuscript = harness.store.manuscript(code).await.unwrap();
    assert_eq!(manuscript.pdf_path, blurred.new_path);
    assert!(manuscript.flags.authors_anonymous);

    let restored = harness.desk.unblur(code, Category::Authors).await.unwrap();
    assert_eq!(restored.restored_count, 1);
    assert_ne!(restored.new_path, blurred.new_path);
    assert_eq!(page_text(&harness, &restored.new_path, 0).await, "Jane Doe\nAbstract follows");

    let manuscript = harness.store.manuscript(code).await.unwrap();
    assert_eq!(manuscript.pdf_path, restored.new_path);
    assert!(!manuscript.flags.authors_anonymous);

    let kinds: Vec<RevisionKind> =
        harness.desk.history(code).await.unwrap().into_iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![RevisionKind::Uploaded, RevisionKind::Blurred, RevisionKind::Unblurred]
    );
}

#[tokio::test]
async fn test_name_split_across_text_operators_is_redacted() {
    let harness = Harness::new();
    let pdf = build_pdf(&[FixturePage::Words(&["Jane", "Doe", "et", "al."])]);
    assert_eq!(LopdfDocument::load(&pdf).unwrap().page_text(0).unwrap(), "Jane Doe et al.");
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", pdf))
        .await
        .unwrap();

    let blurred = harness.desk.blur(code, Category::Authors).await.unwrap();
    assert_eq!(blurred.expected_count, 1);
    assert_eq!(blurred.applied_count, 1);
    let text = page_text(&harness, &blurred.new_path, 0).await;
    assert!(!text.contains("Jane"), "{}", text);
    assert!(!text.contains("Doe"), "{}", text);
    assert_eq!(text, "**** *** et al.");

    let restored = harness.desk.unblur(code, Category::Authors).await.unwrap();
    assert_eq!(restored.restored_count, 1);
    assert_eq!(page_text(&harness, &restored.new_path, 0).await, "Jane Doe et al.");
}

#[tokio::test]
async fn test_name_inside_a_longer_word_is_left_alone() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", text_pdf(&["Jane Doe cites Jane Doerr"])))
        .await
        .unwrap();

    let outcome = harness.desk.blur(code, Category::Authors).await.unwrap();
    assert_eq!(outcome.applied_count, 1);
    assert_eq!(outcome.expected_count, 1);
    assert_eq!(harness.store.redaction_records(code).await.unwrap().len(), 1);
    assert_eq!(
        page_text(&harness, &outcome.new_path, 0).await,
        "******** cites Jane Doerr"
    );
}

#[tokio::test]
async fn test_email_blur_then_unblur() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission(
            "Jane Doe",
            "MIT CSAIL",
            text_pdf(&["Contact jane.doe@uni.edu", "Jane Doe"]),
        ))
        .await
        .unwrap();

    let blurred = harness.desk.blur(code, Category::Email).await.unwrap();
    assert_eq!(blurred.applied_count, 1);
    assert_eq!(
        page_text(&harness, &blurred.new_path, 0).await,
        "Contact ****************\nJane Doe"
    );
    assert!(harness.store.manuscript(code).await.unwrap().flags.mail_anonymous);

    let restored = harness.desk.unblur(code, Category::Email).await.unwrap();
    assert_eq!(restored.restored_count, 1);
    assert_eq!(
        page_text(&harness, &restored.new_path, 0).await,
        "Contact jane.doe@uni.edu\nJane Doe"
    );
    assert!(!harness.store.manuscript(code).await.unwrap().flags.mail_anonymous);
}

/// OCR that takes far longer than any test timeout
struct StalledOcr;

impl OcrEngine for StalledOcr {
    fn recognize(&self, _bitmap: &PageBitmap) -> Result<String> {
        std::thread::sleep(Duration::from_millis(500));
        Ok("Jane Doe".to_string())
    }
}

fn stalled_desk(
    store: &Arc<MemoryStore>,
    root: &std::path::Path,
    config: &ServiceConfig,
) -> ReviewDesk {
    ReviewDesk::new(
        Arc::clone(store),
        Arc::new(LocalFileStore::new(root)),
        Arc::new(LopdfParser),
        Arc::new(StalledOcr),
        config.field_codec().unwrap(),
        config,
    )
}

#[tokio::test]
async fn test_slow_document_work_times_out() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let code = stalled_desk(&store, root.path(), &test_config())
        .submit(submission("Jane Doe", "MIT CSAIL", build_pdf(&[FixturePage::Scan])))
        .await
        .unwrap();
    let before = store.manuscript(code).await.unwrap();

    let mut config = test_config();
    config.redaction.document_timeout_ms = 1;
    let desk = stalled_desk(&store, root.path(), &config);

    let err = desk.blur(code, Category::Authors).await.unwrap_err();
    assert!(matches!(err, Error::TimeoutError(_)), "{:?}", err);
    assert!(err.is_recoverable());

    let after = store.manuscript(code).await.unwrap();
    assert_eq!(after.pdf_path, before.pdf_path);
    assert!(!after.flags.authors_anonymous);
    assert!(store.redaction_records(code).await.unwrap().is_empty());
    assert_eq!(desk.history(code).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_blur_applies_nothing() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", text_pdf(&["Jane Doe wrote this"])))
        .await
        .unwrap();

    assert_eq!(harness.desk.blur(code, Category::Authors).await.unwrap().applied_count, 1);
    let again = harness.desk.blur(code, Category::Authors).await.unwrap();
    assert_eq!(again.applied_count, 0);
    assert_eq!(harness.store.redaction_records(code).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_every_occurrence_gets_its_own_record() {
    let harness = Harness::new();
    let pdf = build_pdf(&[
        FixturePage::Text(&["MIT CSAIL", "Intro"]),
        FixturePage::Text(&["Thanks to MIT CSAIL", "MIT CSAIL"]),
    ]);
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", pdf))
        .await
        .unwrap();

    let outcome = harness.desk.blur(code, Category::Institution).await.unwrap();
    assert_eq!(outcome.applied_count, 3);
    let pages: Vec<u32> = harness
        .store
        .redaction_records(code)
        .await
        .unwrap()
        .iter()
        .map(|r| r.page)
        .collect();
    assert_eq!(pages, vec![0, 1, 1]);
    assert_eq!(page_text(&harness, &outcome.new_path, 1).await, "Thanks to *********\n*********");
}

#[tokio::test]
async fn test_author_unblur_leaves_institution_masked() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission(
            "Jane Doe",
            "MIT CSAIL",
            text_pdf(&["Jane Doe", "MIT CSAIL"]),
        ))
        .await
        .unwrap();

    harness.desk.blur(code, Category::Authors).await.unwrap();
    let institution = harness.desk.blur(code, Category::Institution).await.unwrap();
    assert_eq!(institution.applied_count, 1);

    let restored = harness.desk.unblur(code, Category::Authors).await.unwrap();
    assert_eq!(restored.restored_count, 1);
    assert_eq!(page_text(&harness, &restored.new_path, 0).await, "Jane Doe\n*********");

    let flags = harness.store.manuscript(code).await.unwrap().flags;
    assert!(!flags.authors_anonymous);
    assert!(flags.institution_anonymous);
}

#[tokio::test]
async fn test_scanned_page_is_read_with_ocr_once() {
    let harness = Harness::with_ocr("Jane Doe\nscanned appendix");
    let pdf = build_pdf(&[FixturePage::Text(&["Jane Doe"]), FixturePage::Scan]);
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", pdf))
        .await
        .unwrap();

    let outcome = harness.desk.blur(code, Category::Authors).await.unwrap();
    assert_eq!(harness.ocr.calls(), 1);
    // the scanned occurrence is found in the OCR text but has no glyphs to rewrite
    assert_eq!(outcome.expected_count, 2);
    assert_eq!(outcome.applied_count, 1);
}

#[tokio::test]
async fn test_failed_commit_keeps_the_prior_revision() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", text_pdf(&["Jane Doe"])))
        .await
        .unwrap();
    let before = harness.store.manuscript(code).await.unwrap();

    harness.store.set_commit_failure(true);
    let err = harness.desk.blur(code, Category::Authors).await.unwrap_err();
    assert!(matches!(err, Error::PersistenceConflict(_)), "{:?}", err);
    harness.store.set_commit_failure(false);

    let after = harness.store.manuscript(code).await.unwrap();
    assert_eq!(after.pdf_path, before.pdf_path);
    assert!(!after.flags.authors_anonymous);
    assert!(harness.store.redaction_records(code).await.unwrap().is_empty());

    let orphan = revision_path(&before.pdf_path, code, 2, RevisionKind::Blurred);
    assert!(!harness.files.exists(&orphan).await.unwrap());

    // the manuscript is still usable afterwards
    let outcome = harness.desk.blur(code, Category::Authors).await.unwrap();
    assert_eq!(outcome.applied_count, 1);
}

#[tokio::test]
async fn test_locked_manuscript_reports_contention() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", text_pdf(&["Jane Doe"])))
        .await
        .unwrap();

    let guard = harness.desk.engine().locks().acquire(code).await.unwrap();
    let err = harness.desk.blur(code, Category::Authors).await.unwrap_err();
    assert!(matches!(err, Error::ConcurrentMutationConflict(id) if id == code));
    assert!(err.is_recoverable());
    drop(guard);

    assert!(harness.desk.blur(code, Category::Authors).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_blurs_serialise() {
    let harness = Harness::new();
    let code = harness
        .desk
        .submit(submission(
            "Jane Doe",
            "MIT CSAIL",
            text_pdf(&["Jane Doe", "MIT CSAIL"]),
        ))
        .await
        .unwrap();

    let (authors, institution) = tokio::join!(
        harness.desk.blur(code, Category::Authors),
        harness.desk.blur(code, Category::Institution),
    );
    // with a short lock wait one call may lose the race, but never silently
    let applied: usize = [authors, institution]
        .into_iter()
        .map(|result| match result {
            Ok(outcome) => outcome.applied_count,
            Err(e) => {
                assert!(matches!(e, Error::ConcurrentMutationConflict(_)), "{:?}", e);
                0
            }
        })
        .sum();

    let records = harness.store.redaction_records(code).await.unwrap();
    assert_eq!(records.len(), applied);
    let history = harness.desk.history(code).await.unwrap();
    let current = harness.store.manuscript(code).await.unwrap().pdf_path;
    assert_eq!(history.last().unwrap().path, current);
}

#[tokio::test]
async fn test_corrupt_upload_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .desk
        .submit(submission("Jane Doe", "MIT CSAIL", b"%PDF-garbage".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DocumentOpenError(_)), "{:?}", err);
    assert!(harness.desk.manuscripts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tracking_codes_never_repeat() {
    let harness = Harness::new();
    let mut seen = HashSet::new();
    for _ in 0..25 {
        let code = harness
            .desk
            .submit(submission("Jane Doe", "MIT CSAIL", text_pdf(&["Body"])))
            .await
            .unwrap();
        assert!(seen.insert(code));
    }

    for _ in 0..200 {
        let code: TrackingCode = generate_unique(harness.store.as_ref()).await.unwrap();
        assert!(!seen.contains(&code));
    }
}

#[test]
fn test_status_requires_the_submitting_email() {
    let harness = Harness::new();
    tokio_test::block_on(async {
        let code = harness
            .desk
            .submit(submission("Jane Doe", "MIT CSAIL", text_pdf(&["Body"])))
            .await
            .unwrap();

        let view = harness.desk.status(code, "Jane.Doe@uni.edu").await.unwrap();
        assert_eq!(view.title, "On Blind Review");
        assert_eq!(view.status.to_string(), "pending");
        assert!(view.reviewer.is_none());

        let err = harness.desk.status(code, "someone@else.org").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    });
}
