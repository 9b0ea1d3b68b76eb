//! 图层重写状态机：Scan → Remap → Distribute → Prune → Verify。

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use rpstl_config::{LayerConfig, PrefixNoteConfig};
use rpstl_core::document::{Color, Document, Element};
use rpstl_core::geometry::Point2;
use tracing::{debug, info};

use crate::classify::{PatternClassifier, identifier_texts, survey_layer};
use crate::errors::EngineError;
use crate::journal::Journal;
use crate::mapping_table::{Claim, DestinationClaims, MappingTable};
use crate::pipeline::RunContext;

/// 图框图层都没有前缀说明时的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollapsePolicy {
    /// 始终按映射表逐层重命名。
    #[default]
    Never,
    /// 删除所有候选图层，只建立一个 `{标识}-0` 图层。
    WhenNoPrefixNotes,
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub base_layer: String,
    pub marker_layer: String,
    pub candidate_pattern: Regex,
    pub shared_layers: Vec<String>,
    pub collapse: CollapsePolicy,
    pub prefix_limits: PrefixNoteConfig,
    pub classifier: PatternClassifier,
}

impl RewriteOptions {
    pub fn from_config(layers: &LayerConfig, prefix_limits: PrefixNoteConfig) -> Result<Self, EngineError> {
        let candidate_pattern =
            Regex::new(&layers.candidate_pattern).map_err(|source| EngineError::InvalidPattern {
                pattern: layers.candidate_pattern.clone(),
                source,
            })?;
        Ok(Self {
            base_layer: layers.base_layer.clone(),
            marker_layer: layers.marker_layer.clone(),
            candidate_pattern,
            shared_layers: layers.shared_annotation_layers.clone(),
            collapse: CollapsePolicy::Never,
            prefix_limits,
            classifier: PatternClassifier::from_config(layers),
        })
    }

    pub fn with_collapse(mut self, collapse: CollapsePolicy) -> Self {
        self.collapse = collapse;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerDisposition {
    /// 基础图层、标记图层以及已是 `{标识}-{键}` 形式的图层。
    Keep,
    Candidate,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteReport {
    /// 新图层名 → 来源图层。
    pub remapped: BTreeMap<String, String>,
    pub deleted: Vec<String>,
    pub misses: Vec<String>,
    pub collisions: usize,
    pub collapsed: bool,
    pub violations: Vec<String>,
}

impl RewriteReport {
    pub fn is_noop(&self) -> bool {
        self.remapped.is_empty() && self.deleted.is_empty() && !self.collapsed
    }
}

pub trait Rewriter {
    fn rewrite(
        &self,
        document: &mut Document,
        identifier: &str,
        journal: &mut Journal,
        ctx: &dyn RunContext,
    ) -> Result<RewriteReport, EngineError>;
}

pub struct LayerRewriter<'a> {
    table: &'a MappingTable,
    options: &'a RewriteOptions,
}

impl<'a> LayerRewriter<'a> {
    pub fn new(table: &'a MappingTable, options: &'a RewriteOptions) -> Self {
        Self { table, options }
    }

    pub fn scan(&self, document: &Document, identifier: &str) -> BTreeMap<String, LayerDisposition> {
        let scheme = format!("{identifier}-");
        document
            .layer_names()
            .into_iter()
            .map(|name| {
                let disposition = if name == self.options.base_layer
                    || name == self.options.marker_layer
                    || name.starts_with(&scheme)
                {
                    LayerDisposition::Keep
                } else if self.options.candidate_pattern.is_match(name.trim()) {
                    LayerDisposition::Candidate
                } else {
                    LayerDisposition::Delete
                };
                (name, disposition)
            })
            .collect()
    }

    fn ensure_marker(&self, document: &mut Document) {
        let marker = self.options.marker_layer.as_str();
        if document.has_layer(marker) {
            debug!(layer = marker, "图纸已有标记图层");
            return;
        }
        document.add_point(Point2::new(0.0, 0.0), marker);
        let layer = document.ensure_layer(marker);
        layer.color = Color::WHITE;
        layer.is_frozen = true;
        layer.is_locked = true;
        debug!(layer = marker, "已创建标记图层");
    }

    fn remap(
        &self,
        document: &mut Document,
        identifier: &str,
        candidates: &[String],
        journal: &mut Journal,
        report: &mut RewriteReport,
    ) -> Result<(), EngineError> {
        self.ensure_marker(document);
        if candidates.is_empty() {
            return Ok(());
        }

        let with_notes = candidates
            .iter()
            .filter(|layer| {
                survey_layer(
                    document,
                    layer,
                    &self.options.classifier,
                    &self.options.prefix_limits,
                )
                .has_prefix_note()
            })
            .count();

        if with_notes == 0 && self.options.collapse == CollapsePolicy::WhenNoPrefixNotes {
            for layer in candidates {
                document.delete_layer(layer)?;
                report.deleted.push(layer.clone());
            }
            let target = format!("{identifier}-0");
            document.ensure_layer(&target).color = Color::RED;
            report.remapped.insert(target, String::new());
            report.collapsed = true;
            info!(identifier, "图框图层没有前缀说明，合并为单一图层");
            return Ok(());
        }
        if with_notes > 0 && with_notes < candidates.len() {
            journal.record(format!(
                "{identifier} has 1 or more TM layers that are missing prefixes"
            ));
        }

        let mut claims = DestinationClaims::new();
        let mut losers = Vec::new();
        for layer in candidates {
            let Some(row) = self.table.resolve(layer) else {
                journal.record(format!("No mapping row found for layer: {layer}"));
                report.misses.push(layer.clone());
                continue;
            };
            let target = format!("{identifier}-{}", row.new_key);
            match claims.claim(&row.new_key, layer, row.priority) {
                Claim::Granted => {}
                Claim::Displaced {
                    loser,
                    loser_priority,
                } => {
                    journal.record(collision_message(
                        &target,
                        &loser,
                        loser_priority,
                        layer,
                        row.priority,
                    ));
                    report.collisions += 1;
                    losers.push(loser);
                }
                Claim::Rejected {
                    winner,
                    winner_priority,
                } => {
                    journal.record(collision_message(
                        &target,
                        layer,
                        row.priority,
                        &winner,
                        winner_priority,
                    ));
                    report.collisions += 1;
                    losers.push(layer.clone());
                }
            }
        }

        for loser in losers {
            document.delete_layer(&loser)?;
            report.deleted.push(loser);
        }

        for (new_key, source) in claims.into_winners() {
            let target = format!("{identifier}-{new_key}");
            if document.has_layer(&target) {
                let erased = document.delete_layer(&target)?;
                debug!(layer = %target, erased, "删除已存在的目标图层");
                report.deleted.push(target.clone());
            }
            if let Err(err) = document.rename_layer(&source, &target) {
                journal.record(format!("{source} can't be replaced with {target}"));
                debug!(%err, "图层重命名失败");
                continue;
            }
            if let Some(layer) = document.layer_mut(&target) {
                layer.color = Color::RED;
                layer.is_frozen = true;
            }
            report.remapped.insert(target, source);
        }
        Ok(())
    }

    /// 共享注释图层的元素复制到每个新图层；基础图层上的图号文字复制后追加 `-{键}`。
    fn distribute(
        &self,
        document: &mut Document,
        identifier: &str,
        report: &RewriteReport,
    ) -> Result<(), EngineError> {
        let targets: Vec<&String> = report.remapped.keys().collect();
        for shared in &self.options.shared_layers {
            if !document.has_layer(shared) {
                continue;
            }
            let ids: Vec<_> = document.elements_on_layer(shared).map(|(id, _)| id).collect();
            for target in &targets {
                for id in &ids {
                    document.clone_to_layer(*id, target);
                }
            }
            let erased = document.delete_layer(shared)?;
            debug!(layer = %shared, erased, copies = targets.len(), "共享图层已分发");
        }

        if targets.is_empty() {
            return Ok(());
        }
        let scheme = format!("{identifier}-");
        for (id, text) in identifier_texts(document, &self.options.base_layer) {
            for target in &targets {
                let key = target.strip_prefix(&scheme).unwrap_or(target.as_str());
                if let Some(copy) = document.clone_to_layer(id, target) {
                    if let Some(label) = document.element_mut(copy).and_then(Element::as_text_mut) {
                        label.content = format!("{text}-{key}");
                    }
                }
            }
            document.remove_element(id);
        }
        Ok(())
    }

    fn prune(
        &self,
        document: &mut Document,
        keep: &BTreeSet<String>,
        report: &mut RewriteReport,
    ) -> Result<(), EngineError> {
        document.set_current_layer(&self.options.base_layer)?;
        for name in document.layer_names() {
            if keep.contains(&name)
                || name == self.options.base_layer
                || name == self.options.marker_layer
                || report.remapped.contains_key(&name)
            {
                continue;
            }
            let erased = document.delete_layer(&name)?;
            info!(layer = %name, erased, "删除不在保留集合中的图层");
            report.deleted.push(name);
        }
        Ok(())
    }

    fn verify(
        &self,
        document: &mut Document,
        keep: &BTreeSet<String>,
        journal: &mut Journal,
        report: &mut RewriteReport,
    ) {
        let marker = self.options.marker_layer.as_str();
        let strays: Vec<_> = document
            .elements_on_layer(marker)
            .filter(|(_, element)| !matches!(element, Element::Point(_)))
            .map(|(id, _)| id)
            .collect();
        for id in strays {
            document.remove_element(id);
            journal.record(format!("Deleting unknown object on {marker} layer"));
        }

        let mut expected: BTreeSet<String> = keep
            .iter()
            .filter(|name| document.has_layer(name))
            .cloned()
            .collect();
        expected.insert(self.options.base_layer.clone());
        expected.insert(self.options.marker_layer.clone());
        expected.extend(report.remapped.keys().cloned());

        let actual: BTreeSet<String> = document.layer_names().into_iter().collect();
        for missing in expected.difference(&actual) {
            let message = format!("Expected layer: \"{missing}\" is missing after rewrite");
            journal.record(message.clone());
            report.violations.push(message);
        }
        for extra in actual.difference(&expected) {
            let message = format!("Unexpected layer: \"{extra}\" remains after rewrite");
            journal.record(message.clone());
            report.violations.push(message);
        }
    }
}

fn collision_message(
    target: &str,
    loser: &str,
    loser_priority: i32,
    winner: &str,
    winner_priority: i32,
) -> String {
    if loser_priority == winner_priority {
        format!(
            "Layers {loser} and {winner} both map to {target} with equal priority {winner_priority}; keeping {winner}, deleting {loser}"
        )
    } else {
        format!(
            "Layer {loser} (priority {loser_priority}) lost {target} to {winner} (priority {winner_priority}) and was deleted"
        )
    }
}

impl Rewriter for LayerRewriter<'_> {
    fn rewrite(
        &self,
        document: &mut Document,
        identifier: &str,
        journal: &mut Journal,
        ctx: &dyn RunContext,
    ) -> Result<RewriteReport, EngineError> {
        let mut report = RewriteReport::default();
        document.set_base_layer(&self.options.base_layer);

        let dispositions = self.scan(document, identifier);
        let keep: BTreeSet<String> = dispositions
            .iter()
            .filter(|(_, disposition)| **disposition == LayerDisposition::Keep)
            .map(|(name, _)| name.clone())
            .collect();
        let candidates: Vec<String> = dispositions
            .iter()
            .filter(|(_, disposition)| **disposition == LayerDisposition::Candidate)
            .map(|(name, _)| name.clone())
            .collect();
        debug!(identifier, keep = keep.len(), candidates = candidates.len(), "扫描完成");
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.remap(document, identifier, &candidates, journal, &mut report)?;
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.distribute(document, identifier, &report)?;
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.prune(document, &keep, &mut report)?;
        self.verify(document, &keep, journal, &mut report);
        info!(
            identifier,
            remapped = report.remapped.len(),
            deleted = report.deleted.len(),
            collisions = report.collisions,
            "图层重写完成"
        );
        Ok(report)
    }
}
