use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use rpstl_config::{LayerConfig, PrefixNoteConfig};
use rpstl_core::document::{Document, Element, ElementId};

static IDENTIFIER_MS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^MS\d{6}\S*$").expect("identifier pattern"));
static IDENTIFIER_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]\d{6}\S*$").expect("identifier pattern"));
static CALLOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,4}[A-Z]?$").expect("callout pattern"));
static VIEW_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,2}$").expect("view letter pattern"));
static DESIGNATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,2}\d+(\s*\S*)*$").expect("designator pattern"));

const LEGACY_SUFFIX: &str = "(REF)";
const PREFIX_NOTE_MARKER: &str = "DESIGNATIONS";
const PREFIX_CLAUSE_MARKER: &str = "WITH";
const CARD_SLOT_BLOCK: &str = "HCRDTBL";
const PREFIX_NOTE_BLOCK: &str = "PRENOTE";

/// 文字分类结果。规则按固定顺序匹配，先命中者生效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// 被忽略的图层或旧式 `(REF)` 标注。
    Excluded,
    IdentifierNumber,
    Callout,
    ViewLetter,
    /// 仅为候选，需关联器确认与某个标注相邻。
    ReferenceDesignator,
    PrefixNote,
    Other,
}

pub trait Classifier {
    fn classify(&self, text: &str, layer: &str) -> Classification;
}

#[derive(Debug, Clone)]
pub struct PatternClassifier {
    semantic_prefix: String,
    ignored_layers: Vec<String>,
}

impl PatternClassifier {
    pub fn new(semantic_prefix: impl Into<String>, ignored_layers: Vec<String>) -> Self {
        Self {
            semantic_prefix: semantic_prefix.into().to_lowercase(),
            ignored_layers,
        }
    }

    pub fn from_config(layers: &LayerConfig) -> Self {
        Self::new(
            layers.semantic_prefix.clone(),
            layers.ignored_text_layers.clone(),
        )
    }

    /// 语义图层：名称以语义前缀开头（忽略大小写）。
    pub fn is_semantic_layer(&self, layer: &str) -> bool {
        layer.to_lowercase().starts_with(&self.semantic_prefix)
    }

    fn is_ignored_layer(&self, layer: &str) -> bool {
        self.ignored_layers
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(layer.trim()))
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::from_config(&LayerConfig::default())
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, text: &str, layer: &str) -> Classification {
        let normalized = normalize(text);
        if self.is_ignored_layer(layer) || normalized.ends_with(LEGACY_SUFFIX) {
            return Classification::Excluded;
        }

        let semantic = self.is_semantic_layer(layer);
        if semantic && is_identifier_number(&normalized) {
            return Classification::IdentifierNumber;
        }
        if semantic && CALLOUT.is_match(&normalized) && !normalized.contains('-') {
            return Classification::Callout;
        }
        if semantic && VIEW_LETTER.is_match(&normalized) {
            return Classification::ViewLetter;
        }
        if DESIGNATOR.is_match(&normalized) {
            return Classification::ReferenceDesignator;
        }
        if normalized.contains(PREFIX_NOTE_MARKER) {
            return Classification::PrefixNote;
        }
        Classification::Other
    }
}

#[inline]
fn normalize(text: &str) -> String {
    text.trim().to_uppercase()
}

/// 图号文字：`MS` 加六位数字，或单个大写字母加六位数字。
pub fn is_identifier_number(text: &str) -> bool {
    let normalized = normalize(text);
    IDENTIFIER_MS.is_match(&normalized) || IDENTIFIER_LETTER.is_match(&normalized)
}

/// 把 `P/O` 误写成 `P/0` 的文字。
pub fn is_p0_typo(text: &str) -> bool {
    text.trim() == "P/0"
}

/// 前缀说明中 `WITH` 之后的部分。
pub fn prefix_clause(text: &str) -> String {
    let normalized = normalize(text);
    match normalized.find(PREFIX_CLAUSE_MARKER) {
        Some(index) => normalized[index + PREFIX_CLAUSE_MARKER.len()..]
            .trim()
            .to_string(),
        None => String::new(),
    }
}

/// 由图号文字推导文档标识：去掉 `S` 并转小写（`MS123456` → `m123456`）。
pub fn document_identifier(identifier_text: &str) -> String {
    identifier_text.trim().replace('S', "").to_lowercase()
}

/// 基础图层上的全部图号文字，按插入顺序。
pub fn identifier_texts(document: &Document, base_layer: &str) -> Vec<(ElementId, String)> {
    document
        .elements_on_layer(base_layer)
        .filter_map(|(id, element)| element.as_text().map(|text| (id, text)))
        .filter(|(_, text)| is_identifier_number(&text.content))
        .map(|(id, text)| (id, text.content.trim().to_string()))
        .collect()
}

/// 基础图层上的第一条图号文字。
pub fn find_identifier_text(document: &Document, base_layer: &str) -> Option<(ElementId, String)> {
    identifier_texts(document, base_layer).into_iter().next()
}

/// 前缀说明拼接：后续行以 `", "` 连接，前一段已以逗号结尾时只补空格。
#[derive(Debug, Default, Clone)]
struct PrefixAccumulator {
    value: String,
}

impl PrefixAccumulator {
    fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if self.value.is_empty() {
            self.value.push_str(line);
        } else if self.value.ends_with(',') {
            self.value.push(' ');
            self.value.push_str(line);
        } else {
            self.value.push_str(", ");
            self.value.push_str(line);
        }
    }

    fn finish(mut self) -> String {
        while self.value.ends_with(',') {
            self.value.pop();
        }
        self.value
    }
}

/// 收集前缀说明：`WITH` 之后的子句加上正下方的续行（自上而下）。
///
/// 返回拼好的前缀与续行的元素 id。
pub fn collect_prefix_note(
    document: &Document,
    note: ElementId,
    limits: &PrefixNoteConfig,
) -> Option<(String, Vec<ElementId>)> {
    let head = document.element(note)?.as_text()?;
    let mut below: Vec<_> = document
        .texts()
        .filter(|(id, text)| {
            let dy = head.insert.y() - text.insert.y();
            let dx = (head.insert.x() - text.insert.x()).abs();
            *id != note
                && text.layer == head.layer
                && head.insert.y() > text.insert.y()
                && dy < limits.max_gap_y
                && dx < limits.max_gap_x
        })
        .collect();
    below.sort_by(|(_, a), (_, b)| b.insert.y().total_cmp(&a.insert.y()));

    let mut prefix = PrefixAccumulator::default();
    prefix.push(&prefix_clause(&head.content));
    for (_, line) in &below {
        prefix.push(&line.content);
    }
    Some((
        prefix.finish(),
        below.into_iter().map(|(id, _)| id).collect(),
    ))
}

/// 单个图层上各类元素的分组结果，保持图纸中的原始顺序。
#[derive(Debug, Clone, Default)]
pub struct LayerSurvey {
    pub layer: String,
    pub callouts: Vec<ElementId>,
    pub view_letters: Vec<ElementId>,
    pub identifiers: Vec<ElementId>,
    pub designators: Vec<ElementId>,
    pub others: Vec<ElementId>,
    pub prefix: Option<String>,
    pub continuation_lines: BTreeSet<ElementId>,
    pub card_slots: Vec<ElementId>,
    pub prefix_note_texts: usize,
    pub prefix_note_blocks: usize,
    pub typos: Vec<ElementId>,
}

impl LayerSurvey {
    pub fn has_prefix_note(&self) -> bool {
        self.prefix_note_texts > 0 || self.prefix_note_blocks > 0
    }
}

pub fn survey_layer(
    document: &Document,
    layer: &str,
    classifier: &dyn Classifier,
    limits: &PrefixNoteConfig,
) -> LayerSurvey {
    let mut survey = LayerSurvey {
        layer: layer.to_string(),
        ..LayerSurvey::default()
    };
    let mut prefix = PrefixAccumulator::default();

    for (id, element) in document.elements_on_layer(layer) {
        match element {
            Element::Text(text) => {
                let class = classifier.classify(&text.content, layer);
                if class == Classification::Excluded {
                    continue;
                }
                if is_p0_typo(&text.content) {
                    survey.typos.push(id);
                }
                match class {
                    Classification::IdentifierNumber => survey.identifiers.push(id),
                    Classification::Callout => survey.callouts.push(id),
                    Classification::ViewLetter => survey.view_letters.push(id),
                    Classification::ReferenceDesignator => survey.designators.push(id),
                    Classification::PrefixNote => {
                        survey.prefix_note_texts += 1;
                        if let Some((value, lines)) = collect_prefix_note(document, id, limits) {
                            prefix.push(&value);
                            survey.continuation_lines.extend(lines);
                        }
                    }
                    Classification::Other => survey.others.push(id),
                    Classification::Excluded => {}
                }
            }
            Element::Block(block) => {
                if block.name.contains(PREFIX_NOTE_BLOCK) {
                    survey.prefix_note_blocks += 1;
                }
                if block.name.contains(CARD_SLOT_BLOCK) {
                    survey.card_slots.push(id);
                }
            }
            Element::Line(_) | Element::Point(_) => {}
        }
    }

    let continuation = &survey.continuation_lines;
    survey.others.retain(|id| !continuation.contains(id));
    let value = prefix.finish();
    if !value.is_empty() {
        survey.prefix = Some(value);
    }
    survey
}
