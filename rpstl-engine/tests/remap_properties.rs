use rpstl_config::{LayerConfig, PrefixNoteConfig};
use rpstl_core::{document::Document, geometry::Point2};
use rpstl_engine::{
    NullContext,
    classify::{Classification, Classifier, PatternClassifier},
    journal::Journal,
    mapping_table::MappingTable,
    rewrite::{LayerRewriter, RewriteOptions, Rewriter},
};
use rpstl_io::mapping::MappingRow;

fn options(layers: &LayerConfig) -> RewriteOptions {
    RewriteOptions::from_config(layers, PrefixNoteConfig::default()).expect("valid candidate pattern")
}

#[test]
fn every_text_gets_exactly_one_classification() {
    let classifier = PatternClassifier::default();
    let samples = [
        ("MS123456", "m123456-1"),
        ("12", "m123456-1"),
        ("B", "m123456-1"),
        ("A1", "COUT"),
        ("REFERENCE DESIGNATIONS WITH 2A", "m123456-1"),
        ("12 (REF)", "m123456-1"),
        ("anything", "FILENAME"),
    ];
    let classes: Vec<Classification> = samples
        .iter()
        .map(|(text, layer)| classifier.classify(text, layer))
        .collect();
    assert_eq!(
        classes,
        vec![
            Classification::IdentifierNumber,
            Classification::Callout,
            Classification::ViewLetter,
            Classification::ReferenceDesignator,
            Classification::PrefixNote,
            Classification::Excluded,
            Classification::Excluded,
        ]
    );
}

#[test]
fn longest_legacy_key_wins() {
    let table = MappingTable::new(vec![
        MappingRow::new("M1", "A", 1),
        MappingRow::new("M12", "B", 1),
    ]);
    assert_eq!(table.resolve("M123").map(|row| row.new_key.as_str()), Some("B"));
    assert_eq!(table.resolve("m19").map(|row| row.new_key.as_str()), Some("A"));
    assert!(table.resolve("X1").is_none());
}

#[test]
fn remap_and_prune_twice_changes_nothing() {
    let layers = LayerConfig::default();
    let opts = options(&layers);
    let table = MappingTable::new(vec![MappingRow::new("FRAME-PAGE-LEGACY-", "2", 1)]);
    let rewriter = LayerRewriter::new(&table, &opts);

    let mut doc = Document::new();
    doc.add_text("MS654321", Point2::new(1.0, 0.5), 0.1, "0");
    doc.add_text("7", Point2::new(3.0, 3.0), 0.1, "FRAME-PAGE-LEGACY-01");
    doc.add_line(Point2::new(0.0, 0.0), Point2::new(2.0, 0.0), "BORDER");

    let mut first = Journal::new();
    let report = rewriter
        .rewrite(&mut doc, "m654321", &mut first, &NullContext)
        .expect("first pass");
    assert_eq!(report.remapped.len(), 1);
    let snapshot = doc.clone();

    let mut second = Journal::new();
    let again = rewriter
        .rewrite(&mut doc, "m654321", &mut second, &NullContext)
        .expect("second pass");
    assert!(again.is_noop());
    assert_eq!(doc, snapshot);
    assert!(second.is_empty());
}

#[test]
fn configured_marker_passes_verify_without_deletions() {
    let layers = LayerConfig {
        marker_layer: "gtype".to_string(),
        ..LayerConfig::default()
    };
    let opts = options(&layers);
    let table = MappingTable::default();
    let rewriter = LayerRewriter::new(&table, &opts);

    let mut doc = Document::new();
    doc.add_point(Point2::new(0.0, 0.0), "gtype");
    doc.add_text("3", Point2::new(2.0, 2.0), 0.1, "m000001-3");
    let mut journal = Journal::new();
    let report = rewriter
        .rewrite(&mut doc, "m000001", &mut journal, &NullContext)
        .expect("rewrite");

    assert!(report.deleted.is_empty());
    assert!(report.violations.is_empty());
    assert_eq!(doc.layer_names(), vec!["0", "gtype", "m000001-3"]);
    assert_eq!(doc.element_count(), 2);
    assert!(journal.is_empty());
}

#[test]
fn lower_priority_layer_loses_shared_destination() {
    let layers = LayerConfig {
        candidate_pattern: "^abc".to_string(),
        ..LayerConfig::default()
    };
    let opts = options(&layers);
    let table = MappingTable::new(vec![
        MappingRow::new("abc-legacy1", "X", 1),
        MappingRow::new("abc-legacy2", "X", 2),
    ]);
    let rewriter = LayerRewriter::new(&table, &opts);

    let mut doc = Document::new();
    doc.add_text("first", Point2::new(2.0, 2.0), 0.1, "abc-legacy1");
    doc.add_text("second", Point2::new(3.0, 3.0), 0.1, "abc-legacy2");
    let mut journal = Journal::new();
    let report = rewriter
        .rewrite(&mut doc, "m000002", &mut journal, &NullContext)
        .expect("rewrite");

    assert_eq!(report.collisions, 1);
    assert_eq!(
        report.remapped.get("m000002-X").map(String::as_str),
        Some("abc-legacy2")
    );
    assert!(!doc.has_layer("abc-legacy1"));
    assert!(!doc.has_layer("abc-legacy2"));
    let kept: Vec<String> = doc
        .texts()
        .filter(|(_, text)| text.layer == "m000002-X")
        .map(|(_, text)| text.content.clone())
        .collect();
    assert_eq!(kept, vec!["second".to_string()]);
    assert_eq!(journal.len(), 1);
}
