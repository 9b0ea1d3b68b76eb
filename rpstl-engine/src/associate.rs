use rpstl_config::AssociationConfig;
use rpstl_core::document::{AttributeText, BlockInstance, ElementId, Justification, TextLabel};

use crate::keyfile::truncate_decimal;
use crate::spatial::{self, Axis, Rect, TextAnchor};

const MISSING_CARD_ITEM: &str = "no_itemno_for_card_slot";

/// 参与关联的文字：标注或位号候选。
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ElementId,
    pub layer: String,
    pub text: String,
    pub anchor: TextAnchor,
    pub justification: Justification,
}

impl Candidate {
    pub fn from_text(id: ElementId, text: &TextLabel) -> Self {
        Self {
            id,
            layer: text.layer.clone(),
            text: text.content.clone(),
            anchor: TextAnchor::from(text),
            justification: text.justification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationStatus {
    Unresolved,
    Resolved,
    Ambiguous,
}

/// 一个标注与其相邻位号的关系；歧义时保留全部候选。
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub callout: Candidate,
    pub designators: Vec<Candidate>,
    pub status: AssociationStatus,
}

impl Association {
    fn coordinates(&self) -> String {
        let position = self.callout.anchor.position;
        format!(
            "({}, {})",
            truncate_decimal(position.x(), 3),
            truncate_decimal(position.y(), 3)
        )
    }

    /// 歧义关联的日志文本；对齐方式不是正中时给出单独的提示。
    pub fn ambiguity_message(&self, drawing: &str) -> Option<String> {
        if self.status != AssociationStatus::Ambiguous {
            return None;
        }
        let coordinates = self.coordinates();
        let text = self.callout.text.as_str();
        let layer = self.callout.layer.as_str();
        Some(if self.callout.justification != Justification::MiddleCenter {
            format!(
                "DWG: {drawing} layer: {layer} callout: {text} has an alignment point that isn't middle center {coordinates} "
            )
        } else {
            format!(
                "DWG: {drawing} layer: {layer} has more than one refdes for callout: {text} {coordinates} "
            )
        })
    }

    /// 找不到任何位号的标注。
    pub fn unresolved_message(&self, drawing: &str) -> Option<String> {
        if self.status != AssociationStatus::Unresolved {
            return None;
        }
        Some(format!(
            "DWG: {drawing} layer: {} has no refdes for callout: {} {} ",
            self.callout.layer,
            self.callout.text,
            self.coordinates()
        ))
    }
}

pub trait Associator {
    fn associate(&self, callout: &Candidate, candidates: &[Candidate]) -> Association;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceAssociator {
    config: AssociationConfig,
}

impl ReferenceAssociator {
    pub fn new(config: AssociationConfig) -> Self {
        Self { config }
    }

    fn is_near(&self, callout: &Candidate, candidate: &Candidate) -> bool {
        let origin = callout.anchor.alignment;
        let cfg = &self.config;
        spatial::is_above(
            &candidate.anchor,
            &callout.anchor,
            cfg.above_y_range,
            cfg.alignment_epsilon,
        ) || spatial::is_in_rect(
            candidate.anchor.alignment,
            &Rect::left_zone(origin, cfg.zone_x_range, cfg.zone_y_range),
        ) || spatial::is_in_rect(
            candidate.anchor.alignment,
            &Rect::right_zone(origin, cfg.zone_x_range, cfg.zone_y_range),
        )
    }

    /// 同列上是否有另一个位号夹在候选与标注之间。
    fn is_blocked(&self, callout: &Candidate, candidate: &Candidate, all: &[Candidate]) -> bool {
        all.iter().any(|middle| {
            middle.id != candidate.id
                && middle.id != callout.id
                && middle.layer == candidate.layer
                && spatial::is_between(
                    middle.anchor.alignment,
                    callout.anchor.alignment,
                    candidate.anchor.alignment,
                    Axis::Y,
                    self.config.alignment_epsilon,
                )
        })
    }
}

impl Associator for ReferenceAssociator {
    fn associate(&self, callout: &Candidate, candidates: &[Candidate]) -> Association {
        let designators: Vec<Candidate> = candidates
            .iter()
            .filter(|candidate| {
                candidate.id != callout.id
                    && candidate.layer == callout.layer
                    && self.is_near(callout, candidate)
                    && !self.is_blocked(callout, candidate, candidates)
            })
            .cloned()
            .collect();
        let status = match designators.len() {
            0 => AssociationStatus::Unresolved,
            1 => AssociationStatus::Resolved,
            _ => AssociationStatus::Ambiguous,
        };
        Association {
            callout: callout.clone(),
            designators,
            status,
        }
    }
}

/// 卡槽块（`HCRDTBL`）：第一个属性是位号，第二个是项目号。
#[derive(Debug, Clone, PartialEq)]
pub struct CardSlot {
    pub item: String,
    pub item_attribute: AttributeText,
    pub designator: AttributeText,
}

pub fn card_slot(block: &BlockInstance) -> Option<CardSlot> {
    let designator = block.attributes.first()?.clone();
    let item_attribute = block.attributes.get(1)?.clone();
    let item = if item_attribute.text.trim().is_empty() {
        MISSING_CARD_ITEM.to_string()
    } else {
        item_attribute.text.clone()
    };
    Some(CardSlot {
        item,
        item_attribute,
        designator,
    })
}
