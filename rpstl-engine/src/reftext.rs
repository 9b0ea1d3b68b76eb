//! 引用文字更新：按结构化映射替换附录、章、段、表、节、TM 与图号引用。

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use rpstl_config::ReferenceZoneConfig;
use rpstl_core::document::{Document, Element, ElementId, TextLabel};
use rpstl_core::geometry::Point2;
use rpstl_io::mapping::{RefType, ReferenceMap};
use tracing::debug;

use crate::journal::Journal;
use crate::spatial::Rect;

const SAME_COLUMN_EPSILON: f64 = 1e-9;

static APPENDIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"APPENDIX\s((\w(\s|$))|(\w(\.(\d{1,3}(\.)?)?)($|\s)))").expect("appendix pattern")
});
static CHAPTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"CHAPTER\s((\d{1,3}(\s|$))|(\d{1,3}(\.(\d{1,3}(\.)?)?)($|\s)))").expect("chapter pattern")
});
static SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|\s)SECTION\s\w{1,10}(\.(\d{1,3}(\.)?)?)?(\s|$)").expect("section pattern")
});
static TM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)(SA)?TM(\s|$)").expect("tm pattern"));
static FIGURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s|\()FIGS?($|\s)").expect("figure pattern"));
static FIG_SHEET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((\(|\s)SH(S\s|\s))|(\d{1,3}-\d{1,3}/\d{1,3})").expect("sheet pattern")
});
static FIG_ZONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((\s\()|(^\())[A-Z]\d{1,3}(\.|,|\)|\s|-)").expect("zone pattern")
});
static FIG_SHEET_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}-\d{1,3}/\d{1,3}(,\d{1,3})?$").expect("sheet pattern")
});

static PARAGRAPH: Lazy<Delimited> = Lazy::new(|| {
    Delimited::new(
        r"PARAGRAPH\s(\d{1,3}|[A-Z])-\d{1,3}(\.(\d{1,3}(\.)?)?)?",
        starts_token,
        ends_token,
    )
});
static TABLE_VALUE: Lazy<Delimited> = Lazy::new(|| {
    Delimited::new(r"\d{1,3}-\d{1,3}(\.(\d{1,3}(\.)?)?)?", follows_table, ends_table_value)
});
static TM_NUMBER: Lazy<Delimited> = Lazy::new(|| {
    Delimited::new(r"\d{1,4}(-\d{1,4}){4}", starts_token, ends_tm_number)
});
static FIG_VALUE: Lazy<Delimited> = Lazy::new(|| {
    Delimited::new(r"\d{1,3}-\d{1,3}(\.(\d{1,3}(\.)?)?)?", starts_fig_value, ends_fig_value)
});

/// 带前后边界判定的模式：`before` 收到匹配之前的全部文字，`after` 收到之后的全部文字。
struct Delimited {
    pattern: Regex,
    before: fn(&str) -> bool,
    after: fn(&str) -> bool,
}

impl Delimited {
    fn new(pattern: &str, before: fn(&str) -> bool, after: fn(&str) -> bool) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("delimited pattern"),
            before,
            after,
        }
    }

    fn find_all<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut found = Vec::new();
        let mut start = 0;
        while start <= text.len() {
            let Some(m) = self.pattern.find_at(text, start) else {
                break;
            };
            if (self.before)(&text[..m.start()]) && (self.after)(&text[m.end()..]) {
                found.push(m.as_str());
                start = m.end().max(m.start() + 1);
            } else {
                start = m.start() + text[m.start()..].chars().next().map_or(1, char::len_utf8);
            }
        }
        found
    }

    fn first<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.find_all(text).into_iter().next()
    }
}

fn starts_token(prefix: &str) -> bool {
    prefix.chars().next_back().is_none_or(char::is_whitespace)
}

fn ends_token(suffix: &str) -> bool {
    suffix.chars().next().is_none_or(char::is_whitespace)
}

fn follows_table(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    chars.next_back().is_some_and(char::is_whitespace) && chars.as_str().ends_with("TABLE")
}

fn ends_table_value(suffix: &str) -> bool {
    suffix
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || c == ',')
}

fn ends_tm_number(suffix: &str) -> bool {
    suffix == "." || ends_token(suffix)
}

fn starts_fig_value(prefix: &str) -> bool {
    prefix
        .chars()
        .next_back()
        .is_none_or(|c| c.is_whitespace() || c == '(')
}

fn ends_fig_value(suffix: &str) -> bool {
    suffix
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || matches!(c, ',' | ')' | '/' | '('))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FigureKind {
    Figure,
    Sheet,
    Zone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub replaced: usize,
    pub misses: usize,
    pub malformed: usize,
    pub work_packages: usize,
}

pub struct ReferenceUpdater<'a> {
    map: &'a ReferenceMap,
    zone: ReferenceZoneConfig,
}

impl<'a> ReferenceUpdater<'a> {
    pub fn new(map: &'a ReferenceMap, zone: ReferenceZoneConfig) -> Self {
        Self { map, zone }
    }

    /// 逐条处理图纸中已有的单行文字；本次插入的工作包文字不再参与匹配。
    pub fn apply(&self, document: &mut Document, journal: &mut Journal, drawing: &str) -> UpdateReport {
        let ids: Vec<ElementId> = document.texts().map(|(id, _)| id).collect();
        let mut pass = Pass {
            map: self.map,
            zone: self.zone,
            document,
            journal,
            drawing,
            report: UpdateReport::default(),
            changed: HashSet::new(),
            inserted: HashSet::new(),
            topped: HashSet::new(),
        };
        for id in ids {
            if pass.changed.contains(&id) {
                continue;
            }
            let Some(content) = pass.content(id) else {
                continue;
            };
            pass.update(id, &content.trim().to_uppercase());
        }
        debug!(
            drawing,
            replaced = pass.report.replaced,
            misses = pass.report.misses,
            "引用更新完成"
        );
        pass.report
    }
}

struct Pass<'p> {
    map: &'p ReferenceMap,
    zone: ReferenceZoneConfig,
    document: &'p mut Document,
    journal: &'p mut Journal,
    drawing: &'p str,
    report: UpdateReport,
    /// 已替换过的文字，同一次处理中不再修改。
    changed: HashSet<ElementId>,
    inserted: HashSet<ElementId>,
    /// 已在其上方放置工作包的文字。
    topped: HashSet<ElementId>,
}

impl Pass<'_> {
    fn label(&self, id: ElementId) -> Option<&TextLabel> {
        self.document.element(id).and_then(Element::as_text)
    }

    fn content(&self, id: ElementId) -> Option<String> {
        self.label(id).map(|text| text.content.clone())
    }

    fn set_content(&mut self, id: ElementId, content: String) {
        if let Some(text) = self.document.element_mut(id).and_then(Element::as_text_mut) {
            text.content = content;
            self.changed.insert(id);
            self.report.replaced += 1;
        }
    }

    fn lookup(&mut self, reftype: RefType, label: &str, old: &str, detail: &str) -> Option<String> {
        match self.map.lookup(reftype, old) {
            Some(new) => Some(new.to_string()),
            None => {
                self.journal.record(format!(
                    "New {label} value not found in XML file for old value: {old} in DWG: {}{detail}",
                    self.drawing
                ));
                self.report.misses += 1;
                None
            }
        }
    }

    fn malformed(&mut self, label: &str, upper: &str) {
        self.journal.record(format!(
            "possible {label} found in incorrect form: {upper} in DWG: {}",
            self.drawing
        ));
        self.report.malformed += 1;
    }

    /// 按固定顺序尝试各类引用，第一类命中后即结束。
    fn update(&mut self, id: ElementId, upper: &str) {
        if let Some(m) = APPENDIX.find(upper) {
            self.replace_keyword(id, upper, m.as_str(), "APPENDIX", RefType::Appendix);
            return;
        }
        if let Some(m) = CHAPTER.find(upper) {
            self.replace_keyword(id, upper, m.as_str(), "CHAPTER", RefType::Chapter);
            return;
        }
        if let Some(found) = PARAGRAPH.first(upper) {
            let old = found.replace("PARAGRAPH", "").trim().to_string();
            if let Some(new) = self.lookup(RefType::Para0, "PARA0", &old, "") {
                self.set_content(id, upper.replace(&old, &new));
            }
            return;
        }
        if upper.contains("TEST POINT") || upper.contains("TABLE") {
            self.update_table(id, upper);
            return;
        }
        if upper.contains("SECTION") {
            self.update_section(id, upper);
            return;
        }
        if TM.is_match(upper) {
            self.update_tm(id, upper);
            return;
        }
        if FIGURE.is_match(upper) {
            self.update_figure(id);
            return;
        }
        if FIG_SHEET_ONLY.is_match(upper) {
            let Some(old) = FIG_VALUE.first(upper).map(str::to_string) else {
                return;
            };
            if let Some(new) = self.lookup(RefType::FigSheet, "FIGSHEET (no fig)", &old, "") {
                if let Some(content) = self.content(id) {
                    self.set_content(id, content.replace(&old, &new));
                }
                self.place_work_package(id);
            }
        }
    }

    fn replace_keyword(&mut self, id: ElementId, upper: &str, matched: &str, keyword: &str, reftype: RefType) {
        let old = matched.trim().replace(keyword, "").trim().to_string();
        if let Some(new) = self.lookup(reftype, keyword, &old, "") {
            self.set_content(id, upper.replace(&old, &new));
        }
    }

    fn update_table(&mut self, id: ElementId, upper: &str) {
        if upper == "TABLE" {
            let Some((value_id, old)) = self.table_value_below(id) else {
                self.malformed("TABLE", upper);
                return;
            };
            if let Some(new) = self.lookup(RefType::Table, "TABLE", &old, "") {
                if let Some(content) = self.content(value_id) {
                    self.set_content(value_id, content.replace(&old, &new));
                }
            }
            return;
        }
        let old = if upper == "TEST POINT" {
            upper.to_string()
        } else if let Some(found) = TABLE_VALUE.first(upper) {
            found.trim().to_string()
        } else {
            self.malformed("TABLE", upper);
            return;
        };
        if let Some(new) = self.lookup(RefType::Table, "TABLE", &old, "") {
            self.set_content(id, upper.replace(&old, &new));
        }
    }

    /// 与单独的 `TABLE` 同列、竖直距离小于阈值的第一条文字。
    fn table_value_below(&self, id: ElementId) -> Option<(ElementId, String)> {
        let anchor = self.label(id)?.insert;
        self.document
            .texts()
            .find(|(other, text)| {
                *other != id
                    && (text.insert.x() - anchor.x()).abs() <= SAME_COLUMN_EPSILON
                    && (text.insert.y() - anchor.y()).abs() < self.zone.table_value_gap
            })
            .map(|(other, text)| (other, text.content.trim().to_string()))
    }

    fn update_section(&mut self, id: ElementId, upper: &str) {
        let Some(m) = SECTION.find(upper) else {
            self.malformed("SECTION", upper);
            return;
        };
        let old = m.as_str().trim().replace("SECTION", "").trim().to_string();
        if let Some(new) = self.lookup(RefType::Section, "SECTION", &old, "") {
            if let Some(content) = self.content(id) {
                self.set_content(id, content.replace(&old, &new));
            }
        }
    }

    fn update_tm(&mut self, id: ElementId, upper: &str) {
        let inline: Vec<String> = TM_NUMBER
            .find_all(upper)
            .into_iter()
            .map(|found| found.trim().to_string())
            .collect();
        if !inline.is_empty() {
            for old in inline {
                if let Some(new) = self.lookup(RefType::Tm, "TM", &old, "") {
                    if let Some(content) = self.content(id) {
                        self.set_content(id, content.replace(&old, &new));
                    }
                }
            }
            return;
        }

        let Some(anchor) = self.label(id).map(|text| text.insert) else {
            return;
        };
        let below = self.document.texts().find_map(|(other, text)| {
            let dy = anchor.y() - text.insert.y();
            if other == id || dy <= 0.0 || dy >= self.zone.tm_value_gap {
                return None;
            }
            TM_NUMBER
                .first(&text.content)
                .map(|found| (other, found.trim().to_string()))
        });
        if let Some((value_id, old)) = below {
            if let Some(new) = self.lookup(RefType::Tm, "TM", &old, "") {
                if let Some(content) = self.content(value_id) {
                    self.set_content(value_id, content.replace(&old, &new));
                }
            }
        }
    }

    /// 图题周围的文字组：决定图号类型，替换其中的图号，并在最上方一行之上放置工作包。
    fn update_figure(&mut self, id: ElementId) {
        let Some(anchor) = self.label(id).map(|text| text.insert) else {
            return;
        };
        // `above_y` 向下扩展，`below_y` 向上扩展（以图题下方的图号为参照命名）
        let zone = Rect::around(
            anchor,
            self.zone.left_of_x,
            self.zone.above_y,
            self.zone.right_of_x,
            self.zone.below_y,
        );
        let mut kind = FigureKind::Figure;
        let mut topmost = (id, anchor.y());
        let mut cluster = Vec::new();
        for (other, text) in self.document.texts() {
            if self.inserted.contains(&other) || !zone.contains(text.insert) {
                continue;
            }
            if text.insert.y() > topmost.1 {
                topmost = (other, text.insert.y());
            }
            cluster.push(other);
            if FIG_SHEET.is_match(&text.content) {
                kind = FigureKind::Sheet;
            }
            if FIG_ZONE.is_match(&text.content) {
                kind = FigureKind::Zone;
            }
        }
        debug!(drawing = self.drawing, ?kind, lines = cluster.len(), "图号文字组");

        for line in cluster {
            if line == topmost.0 {
                self.place_work_package(line);
            }
            if self.changed.contains(&line) {
                continue;
            }
            let Some(content) = self.content(line) else {
                continue;
            };
            match kind {
                FigureKind::Figure => {
                    let values: Vec<String> = FIG_VALUE
                        .find_all(&content)
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    let mut updated = content.clone();
                    for old in values {
                        if let Some(new) = self.lookup(RefType::Figure, "FIG", &old, "") {
                            updated = updated.replace(&old, &new);
                        }
                    }
                    if updated != content {
                        self.set_content(line, updated);
                    }
                }
                FigureKind::Sheet => {
                    let Some(old) = FIG_VALUE.first(&content).map(str::to_string) else {
                        continue;
                    };
                    if let Some(new) = self.lookup(RefType::FigSheet, "FIGSHEET", &old, "") {
                        self.set_content(line, content.replace(&old, &new));
                    }
                }
                FigureKind::Zone => {
                    let Some(old) = FIG_VALUE.first(&content).map(str::to_string) else {
                        continue;
                    };
                    let y = self.label(line).map(|text| text.insert.y()).unwrap_or_default();
                    let detail = format!(" at Y= {y}");
                    if let Some(new) = self.lookup(RefType::FigZone, "FIGZONE", &old, &detail) {
                        self.set_content(line, content.replace(&old, &new));
                    }
                }
            }
        }
    }

    /// 工作包文字放在锚点文字上方固定偏移处，沿用其字高与图层；映射中没有工作包时跳过。
    fn place_work_package(&mut self, anchor: ElementId) {
        if self.topped.contains(&anchor) {
            return;
        }
        let Some(work_package) = self.map.work_package().map(str::to_string) else {
            return;
        };
        let Some(text) = self.label(anchor) else {
            return;
        };
        let label = TextLabel::new(
            work_package,
            Point2::new(text.insert.x(), text.insert.y() + self.zone.work_package_offset),
            text.height,
            text.layer.clone(),
        );
        let id = self.document.add_element(Element::Text(label));
        self.topped.insert(anchor);
        self.inserted.insert(id);
        self.report.work_packages += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> ReferenceMap {
        let mut map = ReferenceMap::new();
        map.insert(RefType::Appendix, "B", "C");
        map.insert(RefType::Chapter, "3", "4");
        map.insert(RefType::Para0, "2-5", "2-7");
        map.insert(RefType::Table, "3-1", "4-1");
        map.insert(RefType::Table, "TEST POINT", "TEST POINTS");
        map.insert(RefType::Section, "II", "III");
        map.insert(RefType::Tm, "9-2320-280-10-1", "9-2320-280-10-2");
        map.insert(RefType::Figure, "3-1", "5-1");
        map.insert(RefType::FigSheet, "3-1", "6-1");
        map.insert(RefType::FigZone, "3-1", "7-1");
        map.insert(RefType::Wp, "WP", "WP 0042");
        map
    }

    fn run(doc: &mut Document, map: &ReferenceMap) -> (UpdateReport, Journal) {
        let mut journal = Journal::new();
        let report =
            ReferenceUpdater::new(map, ReferenceZoneConfig::default()).apply(doc, &mut journal, "fbd.dwg");
        (report, journal)
    }

    fn content(doc: &Document, id: ElementId) -> String {
        doc.element(id)
            .and_then(Element::as_text)
            .map(|text| text.content.clone())
            .unwrap_or_default()
    }

    #[test]
    fn delimited_matches_respect_boundaries() {
        assert_eq!(FIG_VALUE.find_all("FIG 3-1 (3-2)"), vec!["3-1", "3-2"]);
        assert!(FIG_VALUE.find_all("1234-5").is_empty());
        assert_eq!(TABLE_VALUE.first("SEE TABLE 3-1, ABOVE"), Some("3-1"));
        assert_eq!(TABLE_VALUE.first("SEE 3-1"), None);
        assert_eq!(
            TM_NUMBER.find_all("TM 9-2320-280-10-1 1-2-3-4-5."),
            vec!["9-2320-280-10-1", "1-2-3-4-5"]
        );
        assert_eq!(PARAGRAPH.first("XPARAGRAPH 2-5"), None);
    }

    #[test]
    fn keyword_references_are_replaced_in_upper_case() {
        let map = map();
        let mut doc = Document::new();
        let appendix = doc.add_text("see appendix B", Point2::new(0.0, 10.0), 0.1, "0");
        let chapter = doc.add_text("CHAPTER 3", Point2::new(5.0, 10.0), 0.1, "0");
        let para = doc.add_text("SEE PARAGRAPH 2-5 FOR DETAILS", Point2::new(10.0, 10.0), 0.1, "0");
        let section = doc.add_text("Section II", Point2::new(15.0, 10.0), 0.1, "0");
        let (report, journal) = run(&mut doc, &map);

        assert_eq!(content(&doc, appendix), "SEE APPENDIX C");
        assert_eq!(content(&doc, chapter), "CHAPTER 4");
        assert_eq!(content(&doc, para), "SEE PARAGRAPH 2-7 FOR DETAILS");
        assert_eq!(content(&doc, section), "Section III");
        assert_eq!(report.replaced, 4);
        assert!(journal.is_empty());
    }

    #[test]
    fn table_values_inline_and_below() {
        let map = map();
        let mut doc = Document::new();
        let inline = doc.add_text("TABLE 3-1", Point2::new(0.0, 10.0), 0.1, "0");
        doc.add_text("TABLE", Point2::new(5.0, 5.0), 0.1, "0");
        let below = doc.add_text("3-1", Point2::new(5.0, 4.8), 0.1, "0");
        let test_point = doc.add_text("TEST POINT", Point2::new(9.0, 9.0), 0.1, "0");
        let (_, journal) = run(&mut doc, &map);

        assert_eq!(content(&doc, inline), "TABLE 4-1");
        assert_eq!(content(&doc, below), "4-1");
        assert_eq!(content(&doc, test_point), "TEST POINTS");
        assert!(journal.is_empty());
    }

    #[test]
    fn malformed_and_missing_values_are_logged() {
        let map = map();
        let mut doc = Document::new();
        doc.add_text("SECTION", Point2::new(0.0, 0.0), 0.1, "0");
        doc.add_text("TABLE OF PARTS", Point2::new(5.0, 5.0), 0.1, "0");
        doc.add_text("CHAPTER 9", Point2::new(9.0, 9.0), 0.1, "0");
        let (report, journal) = run(&mut doc, &map);

        assert_eq!(report.malformed, 2);
        assert_eq!(report.misses, 1);
        let messages: Vec<&str> = journal.messages().collect();
        assert_eq!(
            messages,
            vec![
                "possible SECTION found in incorrect form: SECTION in DWG: fbd.dwg",
                "possible TABLE found in incorrect form: TABLE OF PARTS in DWG: fbd.dwg",
                "New CHAPTER value not found in XML file for old value: 9 in DWG: fbd.dwg",
            ]
        );
    }

    #[test]
    fn tm_numbers_inline_and_below() {
        let map = map();
        let mut doc = Document::new();
        let inline = doc.add_text("REFER TO TM 9-2320-280-10-1", Point2::new(0.0, 10.0), 0.1, "0");
        doc.add_text("TM", Point2::new(5.0, 5.0), 0.1, "0");
        let below = doc.add_text("9-2320-280-10-1", Point2::new(5.0, 4.9), 0.1, "0");
        run(&mut doc, &map);

        assert_eq!(content(&doc, inline), "REFER TO TM 9-2320-280-10-2");
        assert_eq!(content(&doc, below), "9-2320-280-10-2");
    }

    #[test]
    fn figure_cluster_gets_values_and_one_work_package() {
        let map = map();
        let mut doc = Document::new();
        let title = doc.add_text("FIG 3-1", Point2::new(0.0, 0.0), 0.12, "TITLE");
        doc.add_text("WIRING DIAGRAM", Point2::new(0.2, 0.2), 0.12, "TITLE");
        let (report, _) = run(&mut doc, &map);

        assert_eq!(content(&doc, title), "FIG 5-1");
        assert_eq!(report.work_packages, 1);
        let wp = doc
            .texts()
            .find(|(_, text)| text.content == "WP 0042")
            .map(|(_, text)| text.clone())
            .expect("work package text");
        assert!((wp.insert.x() - 0.2).abs() < 1e-9);
        assert!((wp.insert.y() - 0.3).abs() < 1e-9);
        assert_eq!(wp.layer, "TITLE");
    }

    #[test]
    fn zone_and_sheet_clusters_use_their_tables() {
        let map = map();
        let mut doc = Document::new();
        let zone = doc.add_text("FIG 3-1 (A3)", Point2::new(0.0, 0.0), 0.1, "0");
        let sheet = doc.add_text("FIG 3-1 SH 2", Point2::new(10.0, 0.0), 0.1, "0");
        let bare = doc.add_text("3-1/2", Point2::new(20.0, 0.0), 0.1, "0");
        let (report, _) = run(&mut doc, &map);

        assert_eq!(content(&doc, zone), "FIG 7-1 (A3)");
        assert_eq!(content(&doc, sheet), "FIG 6-1 SH 2");
        assert_eq!(content(&doc, bare), "6-1/2");
        assert_eq!(report.work_packages, 3);
    }

    #[test]
    fn stacked_titles_share_one_work_package() {
        let mut map = ReferenceMap::new();
        map.insert(RefType::Figure, "3-1", "5-1");
        map.insert(RefType::Wp, "WP", "WP 0042");
        let mut doc = Document::new();
        doc.add_text("FIG 3-1", Point2::new(0.0, 0.0), 0.1, "0");
        doc.add_text("FIG 3-2", Point2::new(0.0, 0.1), 0.1, "0");
        let (report, journal) = run(&mut doc, &map);

        assert_eq!(report.work_packages, 1);
        assert!(
            journal
                .messages()
                .all(|message| message.starts_with("New FIG value not found"))
        );
    }

    #[test]
    fn no_work_package_means_no_insertions() {
        let mut map = ReferenceMap::new();
        map.insert(RefType::Figure, "3-1", "5-1");
        let mut doc = Document::new();
        doc.add_text("FIG 3-1", Point2::new(0.0, 0.0), 0.1, "0");
        let before = doc.element_count();
        let (report, _) = run(&mut doc, &map);
        assert_eq!(report.work_packages, 0);
        assert_eq!(doc.element_count(), before);
    }
}
