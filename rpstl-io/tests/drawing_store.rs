use std::fs;

use rpstl_core::{
    document::{Color, Document, Element, Justification, Layer, TextLabel},
    geometry::{Bounds2D, Point2},
};
use rpstl_io::{
    AutoStore, DocumentLoader, DocumentSaver, DxfFacade, FormatVersion, IoError, NativeStore,
};

const LABELED_SHEET: &str = "  0
SECTION
  2
HEADER
  9
$ACADVER
  1
AC1015
  9
$CLAYER
  8
0
  9
$EXTMIN
 10
0.0
 20
0.0
  9
$EXTMAX
 10
11.0
 20
8.5
  0
ENDSEC
  0
SECTION
  2
TABLES
  0
TABLE
  2
LAYER
  0
LAYER
  2
0
 70
0
 62
7
  0
LAYER
  2
TM9-2320-280-10-FRAME
 70
1
 62
-1
  0
ENDTAB
  0
ENDSEC
  0
SECTION
  2
ENTITIES
  0
TEXT
  8
TM9-2320-280-10-FRAME
 10
1.0
 20
2.0
 11
1.1
 21
2.05
 40
0.1
  1
12
 72
1
 73
2
  0
LINE
  8
TM9-2320-280-10-FRAME
 10
0.0
 20
0.0
 11
1.0
 21
1.0
  0
INSERT
  8
0
  2
HCRDTBL
 10
3.0
 20
4.0
 66
1
  0
ATTRIB
  2
REFDES
  1
A1
 10
3.0
 20
4.0
  0
ATTRIB
  2
ITEMNO
  1
7
 10
3.2
 20
4.0
  0
SEQEND
  0
HATCH
  8
0
 10
0.0
  0
ENDSEC
  0
EOF
";

#[test]
fn dxf_subset_reads_layers_and_entities() {
    let doc = DxfFacade::parse_str(LABELED_SHEET).expect("解析 DXF 失败");

    let frame = doc.layer("TM9-2320-280-10-FRAME").expect("缺少图层");
    assert!(frame.is_frozen);
    assert!(frame.is_hidden);
    assert_eq!(frame.color, Color::RED);

    // HATCH 被跳过
    assert_eq!(doc.element_count(), 3);

    let (_, callout) = doc.texts().next().expect("缺少文字");
    assert_eq!(callout.content, "12");
    assert_eq!(callout.justification, Justification::MiddleCenter);
    let alignment = callout.alignment_point();
    assert!((alignment.x() - 1.1).abs() < 1e-9);
    assert!((alignment.y() - 2.05).abs() < 1e-9);

    let block = doc
        .elements()
        .find_map(|(_, element)| match element {
            Element::Block(block) => Some(block),
            _ => None,
        })
        .expect("缺少块");
    assert_eq!(block.name, "HCRDTBL");
    assert_eq!(block.attributes.len(), 2);
    assert_eq!(block.attributes[1].text, "7");

    let extents = doc.extents().expect("缺少范围");
    assert!((extents.max().x() - 11.0).abs() < 1e-9);
}

#[test]
fn dxf_save_then_load_keeps_structure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("m123456.dxf");

    let mut doc = Document::new();
    doc.insert_layer(Layer::new("m123456-3").with_color(Color::RED))
        .expect("insert layer");
    doc.add_element(Element::Text(
        TextLabel::new("A12", Point2::new(2.0, 3.0), 0.1, "m123456-3")
            .with_alignment(Point2::new(2.05, 3.05), Justification::MiddleCenter),
    ));
    doc.add_point(Point2::new(0.5, 0.5), "_GTYPE_RPSTL");
    doc.set_extents(Some(Bounds2D::from_corners(
        Point2::new(0.0, 0.0),
        Point2::new(17.0, 11.0),
    )));

    DxfFacade::new()
        .save(&doc, &path, FormatVersion::R2004)
        .expect("保存 DXF 失败");
    let written = fs::read_to_string(&path).expect("read back");
    assert!(written.contains("AC1018"));

    let reloaded = DxfFacade::new().load(&path).expect("重新读取失败");
    assert_eq!(
        reloaded.layer_names(),
        vec!["0", "_GTYPE_RPSTL", "m123456-3"]
    );
    assert_eq!(reloaded.layer("m123456-3").map(|l| l.color), Some(Color::RED));
    assert_eq!(reloaded.element_count(), 2);
    let (_, text) = reloaded.texts().next().expect("text");
    assert_eq!(text.content, "A12");
    assert_eq!(text.justification, Justification::MiddleCenter);
}

#[test]
fn native_store_round_trips_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ms000001.json");

    let mut doc = Document::new();
    doc.add_text("MS000001", Point2::new(1.0, 1.0), 0.12, "0");
    doc.set_property("RTN_FILENAME", "ms000001");
    doc.attach_xref("frame", "frame.json");

    AutoStore::new()
        .save(&doc, &path, FormatVersion::default())
        .expect("保存失败");
    let reloaded = AutoStore::new().load(&path).expect("读取失败");
    assert_eq!(reloaded, doc);
}

#[test]
fn native_store_rejects_foreign_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("other.json");
    let body = serde_json::json!({
        "format": "something-else",
        "version": "R2018",
        "document": Document::new(),
    });
    fs::write(&path, body.to_string()).expect("write");

    let err = NativeStore::new().load(&path).expect_err("格式标记不匹配");
    assert!(matches!(err, IoError::InvalidDocument(_)));
}

#[test]
fn missing_file_reports_read_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = AutoStore::new()
        .load(&dir.path().join("absent.dxf"))
        .expect_err("文件不存在");
    assert!(matches!(err, IoError::ReadError { .. }));
}
