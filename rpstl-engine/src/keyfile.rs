//! 报告模式：把分类与关联结果整理成 keyfile，并序列化为 XML 或 JSON。

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use rpstl_config::{KeyfileConfig, PrefixNoteConfig};
use rpstl_core::document::{AttributeText, Document, Element, ElementId, TextLabel};
use serde::Serialize;
use tracing::debug;

use crate::associate::{AssociationStatus, Associator, Candidate, card_slot};
use crate::classify::{Classifier, survey_layer};
use crate::errors::EngineError;
use crate::journal::Journal;

const APPROXIMATED_COMMENT: &str = "x2 and y2 approximated";
const INVALID_EXTENTS_COMMENT: &str =
    "Invalid x2/y2 extents because text has no max extents or has a non-centered alignment point";

/// 截断（不四舍五入）到指定小数位。整数部分为零时省略前导 0，例如 `.500`。
pub fn truncate_decimal(value: f64, places: u32) -> String {
    let scale = 10f64.powi(places as i32);
    // 抵消二进制表示误差，避免 0.95 被截成 .949
    let scaled = (value * scale + value.signum() * 1e-7).trunc();
    let truncated = if scaled == 0.0 { 0.0 } else { scaled / scale };
    let text = format!("{:.*}", places as usize, truncated);
    if let Some(rest) = text.strip_prefix("0.") {
        format!(".{rest}")
    } else if let Some(rest) = text.strip_prefix("-0.") {
        format!("-.{rest}")
    } else {
        text
    }
}

/// 文字的左下角与右上角。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub approximated: bool,
}

impl TextExtent {
    pub fn is_degenerate(&self) -> bool {
        self.x2 == self.x1 || self.y2 == self.y1
    }
}

/// 计算文字范围：优先使用宿主范围；否则把对齐点沿插入点方向镜像；
/// 仍不可用时按 字符数 × 字高 × 宽度比 估算。
pub fn measure_text(text: &TextLabel, char_width_ratio: f64) -> TextExtent {
    let x1 = text.insert.x();
    let y1 = text.insert.y();
    if let Some(extents) = text.extents {
        return TextExtent {
            x1,
            y1,
            x2: extents.max().x(),
            y2: extents.max().y(),
            approximated: false,
        };
    }

    let alignment = text.alignment_point();
    let offset = text.insert.vector_to(alignment);
    let x2 = (alignment.x() + offset.x()).abs();
    let y2 = (alignment.y() + offset.y()).abs();
    if x2 <= x1 || y2 <= y1 {
        let chars = text.content.trim().chars().count() as f64;
        return TextExtent {
            x1,
            y1,
            x2: x1 + chars * text.height * char_width_ratio,
            y2: y1 + text.height,
            approximated: true,
        };
    }
    TextExtent {
        x1,
        y1,
        x2,
        y2,
        approximated: false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtentsRecord {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub height: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRecord {
    pub text: String,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment2: Option<String>,
}

impl TextRecord {
    fn from_attribute(text: impl Into<String>, attribute: &AttributeText) -> Self {
        let x = attribute.insert.x();
        let y = attribute.insert.y();
        Self {
            text: text.into(),
            x1: x,
            y1: y,
            x2: x,
            y2: y,
            comment: None,
            comment2: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalloutRecord {
    #[serde(flatten)]
    pub label: TextRecord,
    pub designators: Vec<TextRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refdes_prefix: Option<String>,
    /// 卡槽块，输出时与普通标注同为 callout 元素，排在最前。
    pub cards: Vec<CalloutRecord>,
    pub view_letters: Vec<TextRecord>,
    pub identifiers: Vec<TextRecord>,
    pub callouts: Vec<CalloutRecord>,
    pub other_text: Vec<TextRecord>,
}

impl LayerRecord {
    fn is_empty(&self) -> bool {
        self.cards.is_empty()
            && self.callouts.is_empty()
            && self.view_letters.is_empty()
            && self.identifiers.is_empty()
            && self.other_text.is_empty()
    }
}

/// 单张图纸的报告树：图纸 → 图层 → 标注/视图字母/图号/其他文字。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyfile {
    pub version: String,
    pub filename: String,
    pub extents: ExtentsRecord,
    pub layers: Vec<LayerRecord>,
}

pub struct KeyfileBuilder<'a> {
    classifier: &'a dyn Classifier,
    associator: &'a dyn Associator,
    prefix_limits: PrefixNoteConfig,
    options: &'a KeyfileConfig,
}

impl<'a> KeyfileBuilder<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        associator: &'a dyn Associator,
        prefix_limits: PrefixNoteConfig,
        options: &'a KeyfileConfig,
    ) -> Self {
        Self {
            classifier,
            associator,
            prefix_limits,
            options,
        }
    }

    /// `file_name` 含扩展名，用于 `<filename>` 与日志。
    pub fn build(&self, document: &Document, file_name: &str, journal: &mut Journal) -> Keyfile {
        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem);
        let layers = document
            .layer_names()
            .iter()
            .map(|layer| self.layer_record(document, layer, file_name, stem, journal))
            .collect();

        Keyfile {
            version: self.options.version.clone(),
            filename: file_name.to_string(),
            extents: extents_record(document),
            layers,
        }
    }

    fn layer_record(
        &self,
        document: &Document,
        layer: &str,
        file_name: &str,
        stem: &str,
        journal: &mut Journal,
    ) -> LayerRecord {
        let survey = survey_layer(document, layer, self.classifier, &self.prefix_limits);
        for _ in &survey.typos {
            journal.record(format!(
                "P/0 found instead of P/O on layer: {layer} in DWG: {stem}"
            ));
        }
        for _ in 0..survey.prefix_note_blocks {
            journal.record(format!(
                "DWG: {file_name}: layer: {layer}: block reference prefix note found"
            ));
        }

        let mut cards = Vec::new();
        for id in &survey.card_slots {
            let Some(Element::Block(block)) = document.element(*id) else {
                continue;
            };
            match card_slot(block) {
                Some(slot) => cards.push(CalloutRecord {
                    label: TextRecord::from_attribute(slot.item, &slot.item_attribute),
                    designators: vec![TextRecord::from_attribute(
                        slot.designator.text.clone(),
                        &slot.designator,
                    )],
                }),
                None => debug!(layer, block = %block.name, "卡槽块属性不足，跳过"),
            }
        }

        let candidates: Vec<Candidate> = survey
            .designators
            .iter()
            .filter_map(|id| text_of(document, *id).map(|text| Candidate::from_text(*id, text)))
            .collect();
        let view_letters = self.records(document, &survey.view_letters, file_name, journal);
        let identifiers = self.records(document, &survey.identifiers, file_name, journal);

        let mut callouts = Vec::new();
        for id in &survey.callouts {
            let Some(text) = text_of(document, *id) else {
                continue;
            };
            let callout = Candidate::from_text(*id, text);
            let association = self.associator.associate(&callout, &candidates);
            let message = match association.status {
                AssociationStatus::Unresolved => association.unresolved_message(file_name),
                AssociationStatus::Ambiguous => association.ambiguity_message(file_name),
                AssociationStatus::Resolved => None,
            };
            if let Some(message) = message {
                journal.record(message);
            }
            let designators = association
                .designators
                .iter()
                .filter_map(|designator| {
                    text_of(document, designator.id)
                        .map(|text| self.record(text, file_name, journal))
                })
                .collect();
            callouts.push(CalloutRecord {
                label: self.record(text, file_name, journal),
                designators,
            });
        }

        let other_text = self.records(document, &survey.others, file_name, journal);
        LayerRecord {
            name: layer.to_string(),
            refdes_prefix: survey.prefix,
            cards,
            view_letters,
            identifiers,
            callouts,
            other_text,
        }
    }

    fn records(
        &self,
        document: &Document,
        ids: &[ElementId],
        file_name: &str,
        journal: &mut Journal,
    ) -> Vec<TextRecord> {
        ids.iter()
            .filter_map(|id| text_of(document, *id))
            .map(|text| self.record(text, file_name, journal))
            .collect()
    }

    fn record(&self, text: &TextLabel, file_name: &str, journal: &mut Journal) -> TextRecord {
        let extent = measure_text(text, self.options.char_width_ratio);
        let comment2 = extent.is_degenerate().then(|| {
            journal.record(format!(
                "DWG: {file_name} has text object with non-centered alignment point and invalid max extents: \"{}\" on layer: {}",
                text.content, text.layer
            ));
            INVALID_EXTENTS_COMMENT.to_string()
        });
        TextRecord {
            text: text.content.clone(),
            x1: extent.x1,
            y1: extent.y1,
            x2: extent.x2,
            y2: extent.y2,
            comment: extent.approximated.then(|| APPROXIMATED_COMMENT.to_string()),
            comment2,
        }
    }
}

fn text_of(document: &Document, id: ElementId) -> Option<&TextLabel> {
    document.element(id).and_then(Element::as_text)
}

fn extents_record(document: &Document) -> ExtentsRecord {
    match document.extents() {
        Some(bounds) => ExtentsRecord {
            x1: bounds.min().x(),
            y1: bounds.min().y(),
            x2: bounds.max().x(),
            y2: bounds.max().y(),
            height: bounds.height(),
            width: bounds.width(),
        },
        None => ExtentsRecord {
            x1: 0.0,
            y1: 0.0,
            x2: 0.0,
            y2: 0.0,
            height: 0.0,
            width: 0.0,
        },
    }
}

/// 报告序列化器。
pub trait Emitter {
    /// 追加在图纸文件名（不含扩展名）之后的输出后缀。
    fn file_suffix(&self) -> &str;
    fn emit(&self, keyfile: &Keyfile) -> Result<String, EngineError>;
}

#[derive(Debug, Clone)]
pub struct XmlEmitter {
    decimal_places: u32,
    file_suffix: String,
}

impl XmlEmitter {
    pub fn new(options: &KeyfileConfig) -> Self {
        Self {
            decimal_places: options.decimal_places,
            file_suffix: options.file_suffix.clone(),
        }
    }

    fn number(&self, value: f64) -> String {
        truncate_decimal(value, self.decimal_places)
    }

    fn text_element(&self, name: &'static str, record: &TextRecord) -> BytesStart<'static> {
        let mut element = BytesStart::new(name);
        element.push_attribute(("text", record.text.as_str()));
        for (key, value) in [
            ("x1", record.x1),
            ("y1", record.y1),
            ("x2", record.x2),
            ("y2", record.y2),
        ] {
            element.push_attribute((key, self.number(value).as_str()));
        }
        if let Some(comment) = &record.comment {
            element.push_attribute(("comment", comment.as_str()));
        }
        if let Some(comment2) = &record.comment2 {
            element.push_attribute(("comment2", comment2.as_str()));
        }
        element
    }

    fn write_callout(
        &self,
        writer: &mut Writer<Vec<u8>>,
        callout: &CalloutRecord,
    ) -> Result<(), EngineError> {
        let element = self.text_element("callout", &callout.label);
        if callout.designators.is_empty() {
            return writer.write_event(Event::Empty(element)).map_err(xml_err);
        }
        writer.write_event(Event::Start(element)).map_err(xml_err)?;
        for designator in &callout.designators {
            writer
                .write_event(Event::Empty(self.text_element("refdes", designator)))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("callout")))
            .map_err(xml_err)
    }
}

fn xml_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::Xml(err.to_string())
}

impl Emitter for XmlEmitter {
    fn file_suffix(&self) -> &str {
        &self.file_suffix
    }

    fn emit(&self, keyfile: &Keyfile) -> Result<String, EngineError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;

        let mut root = BytesStart::new("rpstl_keyfile");
        root.push_attribute(("version", keyfile.version.as_str()));
        writer.write_event(Event::Start(root)).map_err(xml_err)?;

        let mut filename = BytesStart::new("filename");
        filename.push_attribute(("text", keyfile.filename.as_str()));
        writer.write_event(Event::Empty(filename)).map_err(xml_err)?;

        let extents = &keyfile.extents;
        let mut element = BytesStart::new("extents");
        for (key, value) in [
            ("x1", extents.x1),
            ("y1", extents.y1),
            ("x2", extents.x2),
            ("y2", extents.y2),
            ("height", extents.height),
            ("width", extents.width),
        ] {
            element.push_attribute((key, self.number(value).as_str()));
        }
        writer.write_event(Event::Empty(element)).map_err(xml_err)?;

        for layer in &keyfile.layers {
            let mut start = BytesStart::new("layer");
            start.push_attribute(("text", layer.name.as_str()));
            if let Some(prefix) = &layer.refdes_prefix {
                start.push_attribute(("refdes_prefix", prefix.as_str()));
            }
            if layer.is_empty() {
                writer.write_event(Event::Empty(start)).map_err(xml_err)?;
                continue;
            }
            writer.write_event(Event::Start(start)).map_err(xml_err)?;

            for card in &layer.cards {
                self.write_callout(&mut writer, card)?;
            }
            for record in &layer.view_letters {
                writer
                    .write_event(Event::Empty(self.text_element("view_letter", record)))
                    .map_err(xml_err)?;
            }
            for record in &layer.identifiers {
                writer
                    .write_event(Event::Empty(self.text_element("msno", record)))
                    .map_err(xml_err)?;
            }
            for callout in &layer.callouts {
                self.write_callout(&mut writer, callout)?;
            }
            for record in &layer.other_text {
                writer
                    .write_event(Event::Empty(self.text_element("other_text", record)))
                    .map_err(xml_err)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("layer")))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("rpstl_keyfile")))
            .map_err(xml_err)?;
        let mut body = String::from_utf8(writer.into_inner()).map_err(xml_err)?;
        body.push('\n');
        Ok(body)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEmitter;

impl Emitter for JsonEmitter {
    fn file_suffix(&self) -> &str {
        "_key.json"
    }

    fn emit(&self, keyfile: &Keyfile) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(keyfile)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpstl_core::document::{BlockInstance, Justification};
    use rpstl_core::geometry::{Bounds2D, Point2};

    use crate::associate::ReferenceAssociator;
    use crate::classify::PatternClassifier;

    #[test]
    fn truncation_never_rounds_up() {
        assert_eq!(truncate_decimal(1.23456, 3), "1.234");
        assert_eq!(truncate_decimal(0.5, 3), ".500");
        assert_eq!(truncate_decimal(0.95, 3), ".950");
        assert_eq!(truncate_decimal(-0.5, 3), "-.500");
        assert_eq!(truncate_decimal(-0.0001, 3), ".000");
        assert_eq!(truncate_decimal(17.0, 3), "17.000");
        assert_eq!(truncate_decimal(2.9999, 2), "2.99");
    }

    #[test]
    fn native_extents_win() {
        let text = TextLabel::new("12", Point2::new(1.0, 1.0), 0.1, "m1")
            .with_extents(Bounds2D::new(Point2::new(1.0, 1.0), Point2::new(1.2, 1.1)));
        let extent = measure_text(&text, 1.0);
        assert!(!extent.approximated);
        assert!((extent.x2 - 1.2).abs() < 1e-12);
    }

    #[test]
    fn mirrored_alignment_gives_top_right() {
        let text = TextLabel::new("12", Point2::new(1.0, 1.0), 0.1, "m1")
            .with_alignment(Point2::new(1.1, 1.05), Justification::MiddleCenter);
        let extent = measure_text(&text, 1.0);
        assert!(!extent.approximated);
        assert!((extent.x2 - 1.2).abs() < 1e-9);
        assert!((extent.y2 - 1.1).abs() < 1e-9);
    }

    #[test]
    fn degenerate_alignment_is_approximated_from_char_count() {
        let text = TextLabel::new(" ABC ", Point2::new(2.0, 3.0), 0.125, "m1");
        let extent = measure_text(&text, 0.8);
        assert!(extent.approximated);
        assert!((extent.x2 - (2.0 + 3.0 * 0.125 * 0.8)).abs() < 1e-12);
        assert!((extent.y2 - 3.125).abs() < 1e-12);
        assert!(!extent.is_degenerate());
    }

    fn sample() -> Document {
        let mut doc = Document::new();
        let layer = "m123456-1";
        doc.add_element(Element::Text(
            TextLabel::new("12", Point2::new(0.95, 0.95), 0.1, layer)
                .with_alignment(Point2::new(1.0, 1.0), Justification::MiddleCenter),
        ));
        doc.add_element(Element::Text(
            TextLabel::new("A1", Point2::new(0.95, 1.05), 0.1, layer)
                .with_alignment(Point2::new(1.0, 1.1), Justification::MiddleCenter),
        ));
        doc.add_text("B", Point2::new(4.0, 4.0), 0.2, layer);
        doc.add_text("MS123456-1", Point2::new(6.0, 0.5), 0.1, layer);
        doc.add_text("NOTE: A & B", Point2::new(6.0, 6.0), 0.1, layer);
        doc.add_text("", Point2::new(7.0, 7.0), 0.1, layer);
        doc.set_extents(Some(Bounds2D::new(
            Point2::new(0.0, 0.0),
            Point2::new(11.0, 8.5),
        )));
        doc
    }

    fn build(doc: &Document, journal: &mut Journal) -> Keyfile {
        let classifier = PatternClassifier::default();
        let associator = ReferenceAssociator::default();
        let options = KeyfileConfig::default();
        KeyfileBuilder::new(&classifier, &associator, PrefixNoteConfig::default(), &options)
            .build(doc, "m123456.dxf", journal)
    }

    #[test]
    fn builder_groups_layer_content() {
        let mut journal = Journal::new();
        let keyfile = build(&sample(), &mut journal);
        assert_eq!(keyfile.version, "2.0");
        assert_eq!(keyfile.layers.len(), 2);
        let layer = &keyfile.layers[1];
        assert_eq!(layer.callouts.len(), 1);
        assert_eq!(layer.callouts[0].designators[0].text, "A1");
        assert_eq!(layer.view_letters[0].comment.as_deref(), Some(APPROXIMATED_COMMENT));
        assert_eq!(layer.identifiers[0].text, "MS123456-1");
        assert_eq!(layer.other_text.len(), 2);
        // 空文字估算宽度为零
        assert_eq!(
            layer.other_text[1].comment2.as_deref(),
            Some(INVALID_EXTENTS_COMMENT)
        );
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn xml_output_has_expected_shape() {
        let mut journal = Journal::new();
        let keyfile = build(&sample(), &mut journal);
        let xml = XmlEmitter::new(&KeyfileConfig::default())
            .emit(&keyfile)
            .expect("emit");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<rpstl_keyfile version=\"2.0\">"));
        assert!(xml.contains("<filename text=\"m123456.dxf\"/>"));
        assert!(xml.contains(
            "<extents x1=\".000\" y1=\".000\" x2=\"11.000\" y2=\"8.500\" height=\"8.500\" width=\"11.000\"/>"
        ));
        assert!(xml.contains("<layer text=\"0\"/>"));
        assert!(xml.contains("<callout text=\"12\" x1=\".950\" y1=\".950\" x2=\"1.050\" y2=\"1.050\">"));
        assert!(xml.contains("<refdes text=\"A1\""));
        assert!(xml.contains("comment=\"x2 and y2 approximated\""));
        assert!(xml.contains("text=\"NOTE: A &amp; B\""));
        assert!(xml.contains("<msno text=\"MS123456-1\""));
    }

    #[test]
    fn json_output_round_trips_through_serde() {
        let mut journal = Journal::new();
        let keyfile = build(&sample(), &mut journal);
        let json = JsonEmitter.emit(&keyfile).expect("emit");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["filename"], "m123456.dxf");
        assert_eq!(value["layers"][1]["callouts"][0]["text"], "12");
        assert_eq!(value["layers"][1]["cards"], serde_json::json!([]));
        let cards = json.find("\"cards\"").expect("cards key");
        let letters = json.find("\"view_letters\"").expect("view_letters key");
        let callouts = json.find("\"callouts\"").expect("callouts key");
        assert!(cards < letters && letters < callouts);
    }

    #[test]
    fn cards_lead_and_callouts_follow_identifiers() {
        let mut doc = sample();
        let layer = "m123456-1";
        doc.add_text("34", Point2::new(9.0, 2.0), 0.1, layer);
        doc.add_element(Element::Block(BlockInstance {
            name: "HCRDTBL".to_string(),
            insert: Point2::new(3.0, 7.0),
            attributes: vec![
                AttributeText {
                    tag: "REFDES".to_string(),
                    text: "A9".to_string(),
                    insert: Point2::new(3.0, 7.0),
                },
                AttributeText {
                    tag: "ITEM".to_string(),
                    text: "5".to_string(),
                    insert: Point2::new(3.5, 7.0),
                },
            ],
            layer: layer.to_string(),
        }));
        let mut journal = Journal::new();
        let keyfile = build(&doc, &mut journal);
        let record = &keyfile.layers[1];
        assert_eq!(record.cards.len(), 1);
        assert_eq!(record.cards[0].designators[0].text, "A9");
        assert_eq!(record.callouts.len(), 2);
        assert!(
            journal
                .messages()
                .any(|message| message.contains("has no refdes for callout: 34"))
        );

        let xml = XmlEmitter::new(&KeyfileConfig::default())
            .emit(&keyfile)
            .expect("emit");
        let card = xml.find("<callout text=\"5\"").expect("card");
        let letter = xml.find("<view_letter").expect("view letter");
        let msno = xml.find("<msno").expect("msno");
        let callout = xml.find("<callout text=\"12\"").expect("callout");
        let other = xml.find("<other_text").expect("other text");
        assert!(card < letter && letter < msno && msno < callout && callout < other);
        assert!(xml.contains("<callout text=\"34\""));
    }
}
