//! 各处理模式使用的阶段。每个阶段只通过 `WorkUnit` 读写当前图纸。

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use rpstl_config::{KeyfileConfig, PrefixNoteConfig, ReferenceZoneConfig, RemapConfig};
use rpstl_core::document::{Color, Document, Element, ElementId, Layer};
use rpstl_io::mapping::{CopyMapRow, MappingFileError, StructuredMapping, dash_number};
use rpstl_io::{FormatVersion, GuardedLoader};
use tracing::{debug, info};

use crate::associate::ReferenceAssociator;
use crate::classify::{PatternClassifier, document_identifier, find_identifier_text};
use crate::errors::EngineError;
use crate::journal::Journal;
use crate::keyfile::{Emitter, KeyfileBuilder};
use crate::mapping_table::MappingTable;
use crate::pipeline::{RunContext, Stage, StageFlow, WorkUnit};
use crate::reftext::ReferenceUpdater;
use crate::rewrite::{LayerRewriter, RewriteOptions, Rewriter};

static DELIVERABLE_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^m\d{6}[a-z]{0,2}$").expect("deliverable stem pattern"));
static DASHED_LAYER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^m\d{6}[a-z]{0,2}-\w{1,2}$").expect("dashed layer pattern"));
static PREFIX_NOTE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DESIGNATIONS WITH\s.+$").expect("prefix note pattern"));
static DASHED_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^MS\d{6}[A-Za-z]?-.*$").expect("dashed identifier pattern"));
static LISTED_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)MS(\d{6}[A-Z]?-\d{1,2}[A-Z]?)(?:\s|$)").expect("identifier list pattern")
});

static CHECK_LAYER_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        r"^[ACDFIJKNTVWX]\d{6}[A-Z]?((-|–)\d\d?)?$",
        r"^[ABCDEGHKLNPRUTZ]\d{3}\d?((-|–)\d\d?)?$",
        r"^\d{6}[A-Z]?((-|–)([0-9]|[A-Z]))?$",
    ]
    .map(|pattern| Regex::new(pattern).expect("layer check pattern"))
});
static LEADING_SHEET_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{6}").expect("sheet number pattern"));

const KEPT_LAYERS: &[&str] = &["DEFPOINTS", "COLUMN", "ST_TABLE_VISIBLE", HIDDEN_TABLE_LAYER];
const HIDDEN_TABLE_LAYER: &str = "ST_TABLE_INVISIBLE";
const REMOVABLE_LAYERS: &[&str] = &[
    "IADS_HOTSPOTS",
    "TEMPLATE",
    "ST_AUTOCONVERT_MARKERS",
    "ZONE",
    "FILENAME",
    "SCALE",
    "MSNUM",
];
const CHECK_REPORT_STAMP: &str = "%d%H%M%S";

pub const FILENAME_PROPERTY: &str = "RTN_FILENAME";
pub const CONVERSION_DATE_PROPERTY: &str = "RTN_CONVERSION_DATE";
const CONVERSION_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";
pub const NAMED_OUTPUT_DIR: &str = "ProcessingOutput";

fn output_err(path: &Path) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |source| EngineError::Output {
        path: path.to_path_buf(),
        source,
    }
}

/// 日志前缀：`文件名 (标识): `。
fn drawing_prefix(unit: &WorkUnit) -> String {
    match &unit.identifier {
        Some(identifier) => format!("{} ({identifier}): ", unit.file_name()),
        None => format!("{}: ", unit.file_name()),
    }
}

/// 报告模式：在图纸旁写出 `{stem}{后缀}`。文件名过长的图纸不生成。
pub struct KeyfileStage {
    classifier: PatternClassifier,
    associator: ReferenceAssociator,
    prefix_limits: PrefixNoteConfig,
    options: KeyfileConfig,
    emitter: Box<dyn Emitter + Send + Sync>,
}

impl KeyfileStage {
    pub fn new(
        classifier: PatternClassifier,
        associator: ReferenceAssociator,
        prefix_limits: PrefixNoteConfig,
        options: KeyfileConfig,
        emitter: Box<dyn Emitter + Send + Sync>,
    ) -> Self {
        Self {
            classifier,
            associator,
            prefix_limits,
            options,
            emitter,
        }
    }
}

impl Stage for KeyfileStage {
    fn name(&self) -> &'static str {
        "keyfile"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let stem = unit.stem();
        if stem.chars().count() >= self.options.max_stem_len {
            return Ok(StageFlow::Skip(format!("{stem} is too long for a keyfile name")));
        }
        let builder = KeyfileBuilder::new(
            &self.classifier,
            &self.associator,
            self.prefix_limits,
            &self.options,
        );
        let keyfile = builder.build(&unit.document, &unit.file_name(), &mut unit.journal);
        let body = self.emitter.emit(&keyfile)?;
        let path = unit
            .folder()
            .join(format!("{stem}{}", self.emitter.file_suffix()));
        fs::write(&path, body).map_err(output_err(&path))?;
        info!(path = %path.display(), layers = keyfile.layers.len(), "keyfile 已写出");
        unit.artifacts.push(path);
        Ok(StageFlow::Continue)
    }
}

/// 由基础图层上的图号文字确定文档标识，另存为 `{标识}{扩展名}`，并写入来源与转换时间属性。
pub struct IdentifierStage {
    base_layer: String,
}

impl IdentifierStage {
    pub fn new(base_layer: impl Into<String>) -> Self {
        Self {
            base_layer: base_layer.into(),
        }
    }
}

impl Stage for IdentifierStage {
    fn name(&self) -> &'static str {
        "identifier"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let identifier = match find_identifier_text(&unit.document, &self.base_layer) {
            Some((_, text)) => document_identifier(&text),
            None => {
                let fallback = unit.stem().to_lowercase();
                debug!(source = %unit.source.display(), %fallback, "基础图层上没有图号文字，使用文件名");
                fallback
            }
        };
        let destination = unit
            .folder()
            .join(format!("{identifier}{}", unit.extension()));
        let source = unit.source.display().to_string();
        unit.document.set_property(FILENAME_PROPERTY, source);
        unit.document.set_property(
            CONVERSION_DATE_PROPERTY,
            Local::now().format(CONVERSION_DATE_FORMAT).to_string(),
        );
        unit.identifier = Some(identifier);
        unit.destination = Some(destination);
        Ok(StageFlow::Continue)
    }
}

/// 把外部参照图纸的模型空间并入宿主图纸，然后解除挂接。读取失败的参照保持挂接。
///
/// 参照图纸与宿主一样经由 `GuardedLoader` 读取，挂起的读取会因取消或超时而放弃。
pub struct XrefMergeStage {
    loader: GuardedLoader,
}

impl XrefMergeStage {
    pub fn new(loader: GuardedLoader) -> Self {
        Self { loader }
    }
}

impl Stage for XrefMergeStage {
    fn name(&self) -> &'static str {
        "xref-merge"
    }

    fn run(&self, unit: &mut WorkUnit, ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let prefix = drawing_prefix(unit);
        let folder = unit.folder().to_path_buf();
        for xref in unit.document.xrefs().to_vec() {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let path = if xref.path.is_absolute() {
                xref.path.clone()
            } else {
                folder.join(&xref.path)
            };
            let attached = match self.loader.load_with(&path, &|| ctx.is_cancelled()) {
                Ok(document) => document,
                Err(err) => {
                    unit.journal.record(format!(
                        "{prefix}Could not read XREF: {} because: {err}",
                        path.display()
                    ));
                    if ctx.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    continue;
                }
            };
            for layer in attached.layers() {
                if !unit.document.has_layer(&layer.name) {
                    unit.document.insert_layer(layer.clone())?;
                }
            }
            let mut merged = 0usize;
            for (_, element) in attached.elements() {
                unit.document.add_element(element.clone());
                merged += 1;
            }
            unit.document.detach_xref(&xref.name);
            debug!(xref = %xref.name, merged, "外部参照已并入");
        }
        Ok(StageFlow::Continue)
    }
}

/// 删除图框标题块与标题带之外的文字。
pub struct FrameCleanupStage {
    options: RemapConfig,
}

impl FrameCleanupStage {
    pub fn new(options: RemapConfig) -> Self {
        Self { options }
    }

    fn is_frame_element(&self, element: &Element) -> bool {
        let prefix = self.options.caption_block_prefix.to_uppercase();
        match element {
            Element::Block(block) => block.name.trim().to_uppercase().starts_with(&prefix),
            Element::Text(text) => {
                text.insert.y() <= self.options.caption_band_low
                    || text.insert.y() >= self.options.caption_band_high
            }
            Element::Line(_) | Element::Point(_) => false,
        }
    }
}

impl Stage for FrameCleanupStage {
    fn name(&self) -> &'static str {
        "frame-cleanup"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let doomed: Vec<ElementId> = unit
            .document
            .elements()
            .filter(|(_, element)| self.is_frame_element(element))
            .map(|(id, _)| id)
            .collect();
        for id in &doomed {
            unit.document.remove_element(*id);
        }
        debug!(removed = doomed.len(), "图框元素已清理");
        Ok(StageFlow::Continue)
    }
}

pub struct RewriteStage {
    table: Arc<MappingTable>,
    options: Arc<RewriteOptions>,
}

impl RewriteStage {
    pub fn new(table: Arc<MappingTable>, options: Arc<RewriteOptions>) -> Self {
        Self { table, options }
    }
}

impl Stage for RewriteStage {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    fn run(&self, unit: &mut WorkUnit, ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let identifier = unit
            .identifier
            .clone()
            .unwrap_or_else(|| unit.stem().to_lowercase());
        let prefix = drawing_prefix(unit);
        let mut scratch = Journal::new();
        let rewriter = LayerRewriter::new(&self.table, &self.options);
        let result = rewriter.rewrite(&mut unit.document, &identifier, &mut scratch, ctx);
        unit.journal.absorb(scratch, &prefix);
        result?;
        Ok(StageFlow::Continue)
    }
}

/// 交付格式：保留 `0` 与唯一的 `{stem}-0` 或 `{stem}-{后缀}` 图层，另存为同名文件。
pub struct DeliverStage {
    suffix: String,
    base_layer: String,
    marker_layer: String,
}

impl DeliverStage {
    pub fn new(suffix: impl Into<String>, base_layer: impl Into<String>, marker_layer: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into().trim().to_string(),
            base_layer: base_layer.into(),
            marker_layer: marker_layer.into(),
        }
    }
}

impl Stage for DeliverStage {
    fn name(&self) -> &'static str {
        "deliver"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let stem = unit.stem().trim().to_string();
        if !DELIVERABLE_STEM.is_match(&stem) {
            let reason = format!(
                "Skipping: {} because of incorrect name format",
                unit.source.display()
            );
            unit.journal.record(reason.clone());
            return Ok(StageFlow::Skip(reason));
        }

        let zero_layer = format!("{stem}-0");
        let suffix_layer = format!("{stem}-{}", self.suffix);
        let names = unit.document.layer_names();
        let has_zero = names.contains(&zero_layer);
        let has_suffix = names.contains(&suffix_layer);
        if !has_zero && !has_suffix {
            unit.journal.record(format!(
                "Could not find mx-0 or mx-suffix layer in: {}",
                unit.source.display()
            ));
        }
        if !names.contains(&self.marker_layer) {
            unit.journal.record("GTYPE Layer not found");
        }
        let kept = if has_zero { &zero_layer } else { &suffix_layer };
        unit.document.set_base_layer(&self.base_layer);

        for name in &names {
            if let Some(layer) = unit.document.layer_mut(name) {
                layer.is_locked = false;
            }
            if *name == self.base_layer || name == kept {
                if let Some(layer) = unit.document.layer_mut(name) {
                    layer.is_frozen = false;
                    layer.color = Color::WHITE;
                }
                continue;
            }
            if has_zero && DASHED_LAYER.is_match(name) {
                unit.journal
                    .record(format!("Layer: {name} not allowed in: {stem}"));
            }
            unit.document.delete_layer(name)?;
        }
        unit.document.set_current_layer(&self.base_layer)?;

        let dash = if has_zero { "0" } else { self.suffix.as_str() };
        unit.destination = Some(
            unit.folder()
                .join(format!("{stem}-{dash}{}", unit.extension())),
        );
        Ok(StageFlow::Continue)
    }
}

/// 把旧的带编号图层复制为新编号图层，同步改写前缀说明与图号文字中的编号。
pub struct CopyLayerStage {
    rows: Arc<Vec<CopyMapRow>>,
}

impl CopyLayerStage {
    pub fn new(rows: Arc<Vec<CopyMapRow>>) -> Self {
        Self { rows }
    }
}

fn renumber(content: &str, new_dash: &str) -> String {
    let mut content = content.to_string();
    if PREFIX_NOTE_LINE.is_match(&content) {
        if let Some(index) = content.find("WITH") {
            content = format!("{} {new_dash}", &content[..index + "WITH".len()]);
        }
    }
    if DASHED_IDENTIFIER.is_match(&content) {
        if let Some(index) = content.find('-') {
            content = format!("{}{new_dash}", &content[..=index]);
        }
    }
    content
}

impl Stage for CopyLayerStage {
    fn name(&self) -> &'static str {
        "copy-layer"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let stem = unit.stem();
        let matching: Vec<&CopyMapRow> = self.rows.iter().filter(|row| row.old_name == stem).collect();
        let Some(row) = matching.first().copied() else {
            let reason = format!("Skipping file because no mapping was found for: {stem}");
            unit.journal.record(reason.clone());
            return Ok(StageFlow::Skip(reason));
        };
        if matching.len() > 1 {
            unit.journal.record(format!(
                "More than one mapping entry was found for: {stem}, using: {}|{}|{}",
                row.old_name, row.old_dashed, row.new_dashed
            ));
        }
        let (Some(_), Some(new_dash)) = (row.old_dash(), row.new_dash()) else {
            let reason = format!(
                "old and new dash numbers not found in: {} and {}",
                row.old_dashed, row.new_dashed
            );
            unit.journal.record(reason.clone());
            return Ok(StageFlow::Skip(reason));
        };

        match unit.document.layer(&row.old_dashed).cloned() {
            Some(template) => {
                if !unit.document.has_layer(&row.new_dashed) {
                    unit.document.insert_layer(Layer {
                        name: row.new_dashed.clone(),
                        ..template
                    })?;
                }
                let sources: Vec<ElementId> = unit
                    .document
                    .elements_on_layer(&row.old_dashed)
                    .map(|(id, _)| id)
                    .collect();
                for id in &sources {
                    let Some(copy) = unit.document.clone_to_layer(*id, &row.new_dashed) else {
                        continue;
                    };
                    if let Some(text) = unit.document.element_mut(copy).and_then(Element::as_text_mut) {
                        text.content = renumber(&text.content, new_dash);
                    }
                }
                debug!(from = %row.old_dashed, to = %row.new_dashed, copied = sources.len(), "图层已复制");
            }
            None => {
                unit.journal.record(format!(
                    "{} layer not found in dwg: {}",
                    row.old_dashed,
                    unit.source.display()
                ));
            }
        }
        unit.destination = Some(
            unit.folder()
                .join(format!("{}{}", row.new_dashed, unit.extension())),
        );
        Ok(StageFlow::Continue)
    }
}

/// 读取图号清单文件：每行中的 `MS######[A]-N[A]` 记为图层名 `m######[a]-n[a]`。
pub fn parse_identifier_list(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .flat_map(|line| {
            LISTED_IDENTIFIER
                .captures_iter(line)
                .filter_map(|captures| captures.get(1))
                .map(|m| format!("m{}", m.as_str().to_lowercase()))
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn load_identifier_list(path: &Path) -> Result<BTreeSet<String>, EngineError> {
    let content = fs::read_to_string(path).map_err(|source| MappingFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_identifier_list(&content))
}

/// 只保留基础图层与清单中的图层，输出到 `ProcessingOutput/{stem}-{编号}`。
pub struct NameLayersStage {
    identifiers: Arc<BTreeSet<String>>,
    base_layer: String,
}

impl NameLayersStage {
    pub fn new(identifiers: Arc<BTreeSet<String>>, base_layer: impl Into<String>) -> Self {
        Self {
            identifiers,
            base_layer: base_layer.into(),
        }
    }
}

impl Stage for NameLayersStage {
    fn name(&self) -> &'static str {
        "name-layers"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let file_name = unit.file_name();
        if file_name.contains('-') {
            let reason = format!("{file_name} contains a dash, skipping file.");
            unit.journal.record(reason.clone());
            return Ok(StageFlow::Skip(reason));
        }

        unit.document.set_base_layer(&self.base_layer);
        let mut dash = None;
        for name in unit.document.layer_names() {
            let listed = self.identifiers.contains(&name);
            if !listed && name != self.base_layer {
                unit.document.delete_layer(&name)?;
                continue;
            }
            if listed {
                dash = dash_number(&name).map(str::to_lowercase);
            }
            if let Some(layer) = unit.document.layer_mut(&name) {
                layer.is_frozen = false;
                layer.is_hidden = false;
            }
        }

        let dash = dash.unwrap_or_else(|| "0".to_string());
        unit.destination = Some(
            unit.folder()
                .join(NAMED_OUTPUT_DIR)
                .join(format!("{}-{dash}{}", unit.stem(), unit.extension())),
        );
        Ok(StageFlow::Continue)
    }
}

/// 按结构化映射更新引用文字；逐文件映射中找不到当前文件时跳过。
pub struct ReferenceUpdateStage {
    mapping: Arc<StructuredMapping>,
    zone: ReferenceZoneConfig,
}

impl ReferenceUpdateStage {
    pub fn new(mapping: Arc<StructuredMapping>, zone: ReferenceZoneConfig) -> Self {
        Self { mapping, zone }
    }
}

impl Stage for ReferenceUpdateStage {
    fn name(&self) -> &'static str {
        "update-references"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let file_name = unit.file_name();
        let Some(map) = self.mapping.map_for(&file_name) else {
            let reason = format!("No mapping entry found for: {file_name}");
            unit.journal.record(reason.clone());
            return Ok(StageFlow::Skip(reason));
        };
        let drawing = unit.source.display().to_string();
        let report = ReferenceUpdater::new(map, self.zone).apply(
            &mut unit.document,
            &mut unit.journal,
            &drawing,
        );
        info!(
            %drawing,
            replaced = report.replaced,
            misses = report.misses,
            work_packages = report.work_packages,
            "引用已更新"
        );
        Ok(StageFlow::Continue)
    }
}

/// 图层名改为小写；目标名已存在时记录并保留原名。
#[derive(Debug, Default)]
pub struct LowercaseStage;

impl Stage for LowercaseStage {
    fn name(&self) -> &'static str {
        "lowercase-layers"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        for name in unit.document.layer_names() {
            let lower = name.to_lowercase();
            if lower == name {
                continue;
            }
            if let Err(err) = unit.document.rename_layer(&name, &lower) {
                unit.journal.record(format!(
                    "Could not rename layer {name} in {}: {err}",
                    unit.file_name()
                ));
            }
        }
        Ok(StageFlow::Continue)
    }
}

/// 图层检查：标出不属于交付约定的图层，并可选地就地清理。
///
/// 有问题的图纸追加到批次共用的检查报告中；没有问题时报告文件不会产生。
pub struct LayerCheckStage {
    report: PathBuf,
    apply: bool,
    base_layer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerVerdict {
    Keep,
    Remove,
    Unexpected,
}

impl LayerCheckStage {
    pub fn new(report: impl Into<PathBuf>, apply: bool, base_layer: impl Into<String>) -> Self {
        Self {
            report: report.into(),
            apply,
            base_layer: base_layer.into(),
        }
    }

    /// `{目录}/dwgsource_check_{日时分秒}.txt`
    pub fn report_path(folder: &Path) -> PathBuf {
        folder.join(format!(
            "dwgsource_check_{}.txt",
            Local::now().format(CHECK_REPORT_STAMP)
        ))
    }

    fn verdict(&self, name: &str, stem: &str) -> LayerVerdict {
        let upper = name.trim().to_uppercase();
        if upper == self.base_layer.trim().to_uppercase()
            || KEPT_LAYERS.contains(&upper.as_str())
            || upper == stem
        {
            return LayerVerdict::Keep;
        }
        if REMOVABLE_LAYERS.contains(&upper.as_str())
            || upper.starts_with("REF_")
            || CHECK_LAYER_PATTERNS.iter().any(|pattern| pattern.is_match(&upper))
        {
            return LayerVerdict::Remove;
        }
        LayerVerdict::Unexpected
    }

    fn append_report(&self, source: &Path, block: &str) -> Result<(), EngineError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.report)
            .map_err(output_err(&self.report))?;
        write!(file, "\n{}\n--------\n{block}", source.display()).map_err(output_err(&self.report))
    }
}

/// 图纸号文字：MSNUM 图层优先，其次 FILENAME 图层；格式为 ` (文字) `。
fn sheet_number(document: &Document) -> String {
    ["MSNUM", "FILENAME"]
        .iter()
        .find_map(|layer| {
            document.texts().find_map(|(_, text)| {
                let candidate = text.layer.trim().eq_ignore_ascii_case(layer)
                    && (text.content.contains("MS") || LEADING_SHEET_DIGITS.is_match(&text.content));
                candidate.then(|| format!(" ({}) ", text.content))
            })
        })
        .unwrap_or_default()
}

impl Stage for LayerCheckStage {
    fn name(&self) -> &'static str {
        "check-layers"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let stem = unit.stem().trim().to_uppercase();
        let number = sheet_number(&unit.document);
        if self.apply {
            unit.document.set_base_layer(&self.base_layer);
            unit.document.set_current_layer(&self.base_layer)?;
        }

        let mut block = String::new();
        let mut removed = 0usize;
        for name in unit.document.layer_names() {
            match self.verdict(&name, &stem) {
                LayerVerdict::Keep if self.apply => {
                    if let Some(layer) = unit.document.layer_mut(&name) {
                        layer.is_locked = false;
                        layer.is_frozen = false;
                        layer.is_hidden = name.trim().eq_ignore_ascii_case(HIDDEN_TABLE_LAYER);
                    }
                }
                LayerVerdict::Keep => {}
                LayerVerdict::Remove if self.apply => {
                    unit.document.delete_layer(&name)?;
                    removed += 1;
                }
                LayerVerdict::Remove => {}
                LayerVerdict::Unexpected => {
                    block.push_str(&format!("{name}\t\t\t{number}\n"));
                }
            }
        }
        if self.apply {
            for layer in unit.document.layers_mut() {
                layer.color = Color::WHITE;
            }
        }

        if !block.is_empty() {
            self.append_report(&unit.source, &block)?;
            if !unit.artifacts.contains(&self.report) {
                unit.artifacts.push(self.report.clone());
            }
        }
        debug!(drawing = %unit.file_name(), removed, "图层检查完成");
        Ok(StageFlow::Continue)
    }
}

/// 在图纸所在目录写出 `{stem}.txt`，每行一个图层名。
#[derive(Debug, Default)]
pub struct ListLayersStage;

impl Stage for ListLayersStage {
    fn name(&self) -> &'static str {
        "list-layers"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        let target = unit.folder().join(format!("{}.txt", unit.stem()));
        let mut listing = String::new();
        for layer in unit.document.layers() {
            listing.push_str(layer.name.trim());
            listing.push('\n');
        }
        fs::write(&target, listing).map_err(output_err(&target))?;
        unit.artifacts.push(target);
        Ok(StageFlow::Continue)
    }
}

/// 把子目录中的图纸复制到顶层目录，已有同名文件时不覆盖。
pub struct ExtractStage {
    top: PathBuf,
}

impl ExtractStage {
    pub fn new(top: impl Into<PathBuf>) -> Self {
        Self { top: top.into() }
    }
}

impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        if unit.folder() == self.top.as_path() {
            return Ok(StageFlow::Skip("already in the top directory".to_string()));
        }
        let target = self.top.join(unit.file_name());
        let copied = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .and_then(|mut output| {
                let mut input = fs::File::open(&unit.source)?;
                std::io::copy(&mut input, &mut output)
            });
        match copied {
            Ok(bytes) => {
                info!(source = %unit.source.display(), target = %target.display(), bytes, "图纸已复制到顶层目录");
                unit.artifacts.push(target);
                Ok(StageFlow::Continue)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let reason = format!(
                    "File already exists in top directory: {} : {err}",
                    unit.source.display()
                );
                unit.journal.record(reason.clone());
                Ok(StageFlow::Skip(reason))
            }
            Err(err) => {
                unit.journal.record(format!(
                    "Error copying file: {} : {err}",
                    unit.source.display()
                ));
                Err(EngineError::Output {
                    path: target,
                    source: err,
                })
            }
        }
    }
}

/// 映射输入读取失败时使用：每个图纸各记一条错误，批处理继续。
pub struct UnavailableInputStage {
    path: PathBuf,
    reason: String,
}

impl UnavailableInputStage {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl Stage for UnavailableInputStage {
    fn name(&self) -> &'static str {
        "unavailable-input"
    }

    fn run(&self, _unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        Err(EngineError::InputUnavailable {
            path: self.path.clone(),
            reason: self.reason.clone(),
        })
    }
}

/// 以指定版本另存到 `ConvertedTo{版本}` 子目录。
pub struct ConvertStage {
    format: FormatVersion,
}

impl ConvertStage {
    pub fn new(format: FormatVersion) -> Self {
        Self { format }
    }

    pub fn output_dir(folder: &Path, format: FormatVersion) -> PathBuf {
        folder.join(format!("ConvertedTo{}", format.label()))
    }
}

impl Stage for ConvertStage {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        unit.format = self.format;
        unit.destination = Some(Self::output_dir(unit.folder(), self.format).join(unit.file_name()));
        Ok(StageFlow::Continue)
    }
}
