use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rpstl_config::AppConfig;
use rpstl_core::{document::Document, geometry::Point2};
use rpstl_engine::{
    BatchRunner, ModeRequest, NullContext, spawn_batch,
    batch::ProcessingStatus,
    stages::FILENAME_PROPERTY,
};
use rpstl_io::{AutoStore, DocumentLoader, DocumentSaver, FormatVersion, NativeStore};

const FRAME_A: &str = "TM9-2320-280-10-FRAME-A";

fn save(dir: &Path, name: &str, document: &Document) -> PathBuf {
    let path = dir.join(name);
    NativeStore::new()
        .save(document, &path, FormatVersion::default())
        .expect("seed drawing");
    path
}

fn legacy_drawing() -> Document {
    let mut doc = Document::new();
    doc.add_text("MS123456", Point2::new(1.0, 5.0), 0.1, "0");
    doc.add_text("FIGURE 3 CAPTION", Point2::new(1.0, 0.5), 0.1, "0");
    doc.add_text("12", Point2::new(2.0, 5.0), 0.1, FRAME_A);
    doc.add_text("REFERENCE DESIGNATIONS WITH 2A", Point2::new(5.0, 5.0), 0.1, FRAME_A);
    doc.add_line(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0), "DIMENSIONS");
    doc
}

#[test]
fn remap_batch_writes_identifier_named_drawing() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("rows.txt"), "Legacy\tNew Layer\tPriority\nTM9-2320-280-10-FRAME\t3\t1\n")
        .expect("rows");
    let source = save(dir.path(), "legacy.json", &legacy_drawing());

    let store = Arc::new(AutoStore::new());
    let config = AppConfig::default();
    let plan = ModeRequest::new("remap", dir.path())
        .with_parameter("mapping", "rows.txt")
        .plan(&config, vec![source.clone()], store.clone())
        .expect("plan");
    let runner = BatchRunner::with_config(store, &config.batch);
    let handle = spawn_batch(runner, plan).expect("spawn");
    let summary = handle.join().expect("batch");

    assert_eq!(summary.count(ProcessingStatus::Completed), 1);
    assert!(summary.log_path.is_none());
    assert!(summary.to_string().ends_with("No errors found."));

    let output = NativeStore::new()
        .load(&dir.path().join("m123456.json"))
        .expect("remapped drawing");
    assert_eq!(
        output.layer_names(),
        vec!["0", "_GTYPE_RPSTL", "m123456-3"]
    );
    assert_eq!(
        output.properties().get(FILENAME_PROPERTY),
        Some(&source.display().to_string())
    );
    // 标题带文字被清理，图号文字移到新图层
    assert_eq!(output.count_on_layer("0"), 0);
    assert!(
        output
            .texts()
            .any(|(_, text)| text.layer == "m123456-3" && text.content == "MS123456-3")
    );
    assert!(source.exists());
}

#[test]
fn keyfile_batch_leaves_drawings_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut doc = Document::new();
    doc.add_text("12", Point2::new(1.0, 1.0), 0.1, "m123456-1");
    let short = save(dir.path(), "m123456.json", &doc);
    let long = save(dir.path(), "m123456-frame-extra.json", &doc);
    let before = fs::read_to_string(&short).expect("read source");

    let store = Arc::new(NativeStore::new());
    let plan = ModeRequest::new("keyfile", dir.path())
        .plan(&AppConfig::default(), vec![short.clone(), long], store.clone())
        .expect("plan");
    let summary = BatchRunner::new(store)
        .run(&plan, &NullContext)
        .expect("batch");

    assert_eq!(summary.count(ProcessingStatus::Completed), 1);
    assert_eq!(summary.count(ProcessingStatus::Skipped), 1);
    let xml = fs::read_to_string(dir.path().join("m123456_key.xml")).expect("keyfile");
    assert!(xml.contains("<filename text=\"m123456.json\"/>"));
    assert!(!dir.path().join("m123456-frame-extra_key.xml").exists());
    assert_eq!(fs::read_to_string(&short).expect("read source"), before);
    assert_eq!(summary.outcomes[0].artifacts, vec![dir.path().join("m123456_key.xml")]);
}

#[test]
fn convert_and_reference_update_write_to_subfolders() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut doc = Document::new();
    doc.add_text("TM 9-2320-280-10-1", Point2::new(2.0, 4.0), 0.1, "m123456-1");
    let source = save(dir.path(), "m123456.json", &doc);
    let store = Arc::new(NativeStore::new());

    let convert = ModeRequest::new("convert", dir.path())
        .with_parameter("version", "2004")
        .plan(&AppConfig::default(), vec![source.clone()], store.clone())
        .expect("plan");
    let summary = BatchRunner::new(store.clone())
        .run(&convert, &NullContext)
        .expect("convert");
    let converted = dir.path().join("ConvertedTo2004").join("m123456.json");
    assert_eq!(summary.outcomes[0].saved.as_deref(), Some(converted.as_path()));
    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&converted).expect("converted")).expect("json");
    assert_eq!(raw["version"], "R2004");

    fs::write(
        dir.path().join("refs.xml"),
        r#"<mapping><map reftype="tm" old="9-2320-280-10-1" new="9-2320-280-13-1"/></mapping>"#,
    )
    .expect("mapping");
    let update = ModeRequest::new("update-references", dir.path())
        .with_parameter("mapping", "refs.xml")
        .plan(&AppConfig::default(), vec![source], store.clone())
        .expect("plan");
    BatchRunner::new(store)
        .run(&update, &NullContext)
        .expect("update");
    let updated = NativeStore::new()
        .load(&dir.path().join("Updated").join("m123456.json"))
        .expect("updated drawing");
    let content: Vec<&str> = updated.texts().map(|(_, text)| text.content.as_str()).collect();
    assert_eq!(content, vec!["TM 9-2320-280-13-1"]);
}

#[test]
fn unreadable_mapping_fails_every_drawing_and_keeps_going() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = save(dir.path(), "m111111.json", &Document::new());
    let second = save(dir.path(), "m222222.json", &Document::new());
    fs::write(dir.path().join("rows.txt"), "m111111|m111111-1\n").expect("rows");

    let store = Arc::new(NativeStore::new());
    let plan = ModeRequest::new("copy-layer", dir.path())
        .with_parameter("mapping", "rows.txt")
        .plan(&AppConfig::default(), vec![first, second], store.clone())
        .expect("plan");
    let summary = BatchRunner::new(store)
        .run(&plan, &NullContext)
        .expect("batch");

    assert_eq!(summary.count(ProcessingStatus::Failed), 2);
    assert_eq!(summary.processed(), 2);
    let log_path = summary.log_path.expect("log kept");
    let log = fs::read_to_string(log_path).expect("log");
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().all(|line| line.contains("rows.txt")));
}

#[test]
fn extract_batch_gathers_nested_drawings_into_the_top_folder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("Vol2");
    fs::create_dir(&nested).expect("mkdir");
    let mut doc = Document::new();
    doc.add_text("MS654321", Point2::new(1.0, 1.0), 0.1, "0");
    let inner = save(&nested, "m654321.json", &doc);
    let top = save(dir.path(), "m111111.json", &Document::new());

    let store = Arc::new(NativeStore::new());
    let plan = ModeRequest::new("extract", dir.path())
        .plan(&AppConfig::default(), vec![inner, top], store.clone())
        .expect("plan");
    let summary = BatchRunner::new(store.clone())
        .run(&plan, &NullContext)
        .expect("batch");

    assert_eq!(summary.count(ProcessingStatus::Completed), 1);
    assert_eq!(summary.count(ProcessingStatus::Skipped), 1);
    let copied = store
        .load(&dir.path().join("m654321.json"))
        .expect("copied drawing");
    assert!(copied.texts().any(|(_, text)| text.content == "MS654321"));
    assert!(summary.log_path.is_none());
}

#[test]
fn check_layers_batch_writes_one_report_for_the_folder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut clean = Document::new();
    clean.ensure_layer("m111111");
    let mut odd = Document::new();
    odd.ensure_layer("Sketch");
    odd.ensure_layer("ZONE");
    let first = save(dir.path(), "m111111.json", &clean);
    let second = save(dir.path(), "m222222.json", &odd);

    let store = Arc::new(NativeStore::new());
    let plan = ModeRequest::new("check-layers", dir.path())
        .with_parameter("apply", "true")
        .plan(&AppConfig::default(), vec![first, second.clone()], store.clone())
        .expect("plan");
    let summary = BatchRunner::new(store.clone())
        .run(&plan, &NullContext)
        .expect("batch");

    assert_eq!(summary.count(ProcessingStatus::Completed), 2);
    let reports: Vec<PathBuf> = summary
        .outcomes
        .iter()
        .flat_map(|outcome| outcome.artifacts.clone())
        .collect();
    assert_eq!(reports.len(), 1);
    let report = fs::read_to_string(&reports[0]).expect("report");
    assert!(report.contains("m222222.json\n--------\nSketch\t\t\t\n"));
    let saved = store.load(&second).expect("checked drawing");
    assert!(!saved.has_layer("ZONE"));
    assert!(saved.has_layer("Sketch"));
}
