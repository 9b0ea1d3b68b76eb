//! 外部映射文件：表格导出的图层映射行、竖线分隔的图层复制表、结构化引用映射文档。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

static DASH_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^m\d{6}[A-Za-z]?-(\d{1,2}[A-Za-z]?)$").expect("dash number pattern")
});

#[derive(Debug, Error)]
pub enum MappingFileError {
    #[error("failed to read mapping file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed mapping line {line}: {message}")]
    Malformed { line: usize, message: String },
    #[error("invalid mapping document: {0}")]
    Xml(String),
    #[error("<{element}> is missing attribute {attribute:?}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
}

fn read_file(path: &Path) -> Result<String, MappingFileError> {
    fs::read_to_string(path).map_err(|source| MappingFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// 一条图层映射规则：旧键前缀 → 新图层代码，附带优先级。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    pub legacy_key: String,
    pub new_key: String,
    pub priority: i32,
}

impl MappingRow {
    pub fn new(legacy_key: impl Into<String>, new_key: impl Into<String>, priority: i32) -> Self {
        Self {
            legacy_key: legacy_key.into(),
            new_key: new_key.into(),
            priority,
        }
    }
}

/// 映射行来源。表格解析属于外部协作方，核心只依赖这个接口。
pub trait MappingSource {
    fn load_rows(&self, path: &Path) -> Result<Vec<MappingRow>, MappingFileError>;
}

/// 读取表格导出的分隔文本（逗号、制表符或分号）。
///
/// 表头行里包含 `LEGACY`、`NEW LAYER`、`PRIORITY` 的列被用作数据列；
/// 没有表头时按前三列顺序读取。缺少任一字段的行被跳过。
#[derive(Debug, Default, Clone, Copy)]
pub struct DelimitedRowSource {
    delimiter: Option<char>,
}

impl DelimitedRowSource {
    pub fn new() -> Self {
        Self { delimiter: None }
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }

    pub fn parse_str(&self, content: &str) -> Result<Vec<MappingRow>, MappingFileError> {
        let delimiter = self.delimiter.unwrap_or_else(|| detect_delimiter(content));
        let mut columns = (0usize, 1usize, 2usize);
        let mut rows = Vec::new();

        for (index, raw_line) in content.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split(delimiter).map(|cell| cell.trim()).collect();
            if let Some(header) = header_columns(&cells) {
                columns = header;
                continue;
            }
            let (legacy_col, new_col, priority_col) = columns;
            let (Some(legacy), Some(new_key), Some(priority)) = (
                cells.get(legacy_col).filter(|cell| !cell.is_empty()),
                cells.get(new_col).filter(|cell| !cell.is_empty()),
                cells.get(priority_col).filter(|cell| !cell.is_empty()),
            ) else {
                debug!(line = line_number, "跳过不完整的映射行");
                continue;
            };
            let priority = parse_priority(priority).ok_or_else(|| MappingFileError::Malformed {
                line: line_number,
                message: format!("priority {priority:?} is not an integer"),
            })?;
            rows.push(MappingRow::new(*legacy, *new_key, priority));
        }
        Ok(rows)
    }
}

impl MappingSource for DelimitedRowSource {
    fn load_rows(&self, path: &Path) -> Result<Vec<MappingRow>, MappingFileError> {
        self.parse_str(&read_file(path)?)
    }
}

fn detect_delimiter(content: &str) -> char {
    let sample = content.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    ['\t', ',', ';']
        .into_iter()
        .max_by_key(|candidate| sample.matches(*candidate).count())
        .filter(|candidate| sample.contains(*candidate))
        .unwrap_or(',')
}

fn header_columns(cells: &[&str]) -> Option<(usize, usize, usize)> {
    let find = |needle: &str| {
        cells
            .iter()
            .position(|cell| cell.to_uppercase().contains(needle))
    };
    Some((find("LEGACY")?, find("NEW LAYER")?, find("PRIORITY")?))
}

fn parse_priority(raw: &str) -> Option<i32> {
    if let Ok(value) = raw.parse::<i32>() {
        return Some(value);
    }
    // 表格导出常把整数写成 `2.0`
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.fract() == 0.0)
        .map(|value| value as i32)
}

/// 图层复制表中的一行：`旧文件名|旧带破折号图层|新带破折号图层`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyMapRow {
    pub old_name: String,
    pub old_dashed: String,
    pub new_dashed: String,
}

impl CopyMapRow {
    pub fn old_dash(&self) -> Option<&str> {
        dash_number(&self.old_dashed)
    }

    pub fn new_dash(&self) -> Option<&str> {
        dash_number(&self.new_dashed)
    }
}

/// 提取 `m######[A]-NN[A]` 末尾的破折号编号。
pub fn dash_number(name: &str) -> Option<&str> {
    DASH_NUMBER
        .captures(name.trim())
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

pub fn parse_pipe_rows(content: &str) -> Result<Vec<CopyMapRow>, MappingFileError> {
    let mut rows = Vec::new();
    for (index, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.splitn(3, '|').map(str::trim).collect();
        match fields.as_slice() {
            [old_name, old_dashed, new_dashed]
                if !old_name.is_empty() && !old_dashed.is_empty() && !new_dashed.is_empty() =>
            {
                rows.push(CopyMapRow {
                    old_name: old_name.to_string(),
                    old_dashed: old_dashed.to_string(),
                    new_dashed: new_dashed.to_string(),
                });
            }
            _ => {
                return Err(MappingFileError::Malformed {
                    line: index + 1,
                    message: format!("expected 3 '|' separated fields, found {line:?}"),
                });
            }
        }
    }
    Ok(rows)
}

pub fn load_pipe_rows(path: &Path) -> Result<Vec<CopyMapRow>, MappingFileError> {
    parse_pipe_rows(&read_file(path)?)
}

/// 引用类型，对应映射文档中 `<map reftype=...>` 的取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefType {
    Appendix,
    Chapter,
    Para0,
    Section,
    Figure,
    FigSheet,
    FigZone,
    Table,
    Tm,
    Wp,
}

impl RefType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "appendix" => Some(RefType::Appendix),
            "chapter" => Some(RefType::Chapter),
            "para0" => Some(RefType::Para0),
            "section" => Some(RefType::Section),
            "figure" => Some(RefType::Figure),
            "figsheet" => Some(RefType::FigSheet),
            "figzone" => Some(RefType::FigZone),
            "table" => Some(RefType::Table),
            "tm" => Some(RefType::Tm),
            "wp" => Some(RefType::Wp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RefType::Appendix => "appendix",
            RefType::Chapter => "chapter",
            RefType::Para0 => "para0",
            RefType::Section => "section",
            RefType::Figure => "figure",
            RefType::FigSheet => "figsheet",
            RefType::FigZone => "figzone",
            RefType::Table => "table",
            RefType::Tm => "tm",
            RefType::Wp => "wp",
        }
    }
}

/// 按引用类型分组的 旧值 → 新值 表。重复键保留首次出现的值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceMap {
    entries: BTreeMap<RefType, BTreeMap<String, String>>,
    work_package: Option<String>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一条映射；键已存在时忽略并返回 `false`。
    pub fn insert(&mut self, reftype: RefType, old: impl Into<String>, new: impl Into<String>) -> bool {
        let old = old.into();
        let new = new.into();
        let bucket = self.entries.entry(reftype).or_default();
        if bucket.contains_key(&old) {
            return false;
        }
        if reftype == RefType::Wp && self.work_package.is_none() {
            self.work_package = Some(new.clone());
        }
        bucket.insert(old, new);
        true
    }

    pub fn lookup(&self, reftype: RefType, old: &str) -> Option<&str> {
        self.entries
            .get(&reftype)
            .and_then(|bucket| bucket.get(old))
            .map(String::as_str)
    }

    /// 一张图纸只有一个工作包编号，取首条 `wp` 映射的新值。
    pub fn work_package(&self) -> Option<&str> {
        self.work_package.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileMapping {
    pub old_fname: String,
    pub new_fname: String,
    pub map: ReferenceMap,
}

/// 结构化映射文档。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredMapping {
    pub files: Vec<FileMapping>,
    /// 所有 `<map>` 行汇总（首次出现优先），未逐文件指定时使用。
    pub pooled: ReferenceMap,
    pub ignored_duplicates: usize,
}

impl StructuredMapping {
    pub fn load(path: &Path) -> Result<Self, MappingFileError> {
        Self::parse(&read_file(path)?)
    }

    pub fn parse(xml: &str) -> Result<Self, MappingFileError> {
        let mut reader = Reader::from_str(xml);
        let mut mapping = StructuredMapping::default();
        let mut current: Option<FileMapping> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|err| MappingFileError::Xml(err.to_string()))?;
            match event {
                Event::Start(ref element) | Event::Empty(ref element) => {
                    let self_closing = matches!(event, Event::Empty(_));
                    match element.name().as_ref() {
                        b"file" => {
                            let attributes = collect_attributes(element)?;
                            let file = FileMapping {
                                old_fname: required(&attributes, "file", "oldfname")?,
                                new_fname: required(&attributes, "file", "newfname")?,
                                map: ReferenceMap::new(),
                            };
                            if self_closing {
                                mapping.files.push(file);
                            } else {
                                current = Some(file);
                            }
                        }
                        b"map" => {
                            let attributes = collect_attributes(element)?;
                            let raw_type = required(&attributes, "map", "reftype")?;
                            let old = required(&attributes, "map", "old")?;
                            let new = required(&attributes, "map", "new")?;
                            let Some(reftype) = RefType::parse(&raw_type) else {
                                debug!(reftype = %raw_type, "忽略未知的引用类型");
                                continue;
                            };
                            if let Some(file) = current.as_mut() {
                                if !file.map.insert(reftype, old.clone(), new.clone()) {
                                    mapping.ignored_duplicates += 1;
                                }
                            }
                            if !mapping.pooled.insert(reftype, old, new) && current.is_none() {
                                mapping.ignored_duplicates += 1;
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(ref element) if element.name().as_ref() == b"file" => {
                    if let Some(file) = current.take() {
                        mapping.files.push(file);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if current.is_some() {
            return Err(MappingFileError::Xml("unterminated <file> element".to_string()));
        }
        Ok(mapping)
    }

    pub fn is_per_file(&self) -> bool {
        !self.files.is_empty()
    }

    /// 找到某个输入文件的映射；文件名比较忽略大小写。
    pub fn file_entry(&self, file_name: &str) -> Option<&FileMapping> {
        self.files
            .iter()
            .find(|file| file.old_fname.eq_ignore_ascii_case(file_name))
    }

    pub fn map_for(&self, file_name: &str) -> Option<&ReferenceMap> {
        if self.is_per_file() {
            self.file_entry(file_name).map(|file| &file.map)
        } else {
            Some(&self.pooled)
        }
    }
}

fn collect_attributes(
    element: &BytesStart<'_>,
) -> Result<BTreeMap<String, String>, MappingFileError> {
    let mut attributes = BTreeMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|err| MappingFileError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| MappingFileError::Xml(err.to_string()))?;
        attributes.insert(key, value.trim().to_string());
    }
    Ok(attributes)
}

fn required(
    attributes: &BTreeMap<String, String>,
    element: &'static str,
    attribute: &'static str,
) -> Result<String, MappingFileError> {
    attributes
        .get(attribute)
        .cloned()
        .ok_or(MappingFileError::MissingAttribute { element, attribute })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_rows_use_header_columns() {
        let content = "Notes,Legacy Layer,New Layer Code,Priority\n\
                       x,TM9-1234-567-10-FIG1,3,2\n\
                       x,TM9-1234-567-10,1,1\n\
                       x,,4,1\n";
        let rows = DelimitedRowSource::new().parse_str(content).expect("rows");
        assert_eq!(
            rows,
            vec![
                MappingRow::new("TM9-1234-567-10-FIG1", "3", 2),
                MappingRow::new("TM9-1234-567-10", "1", 1),
            ]
        );
    }

    #[test]
    fn delimited_rows_reject_bad_priority() {
        let err = DelimitedRowSource::with_delimiter('\t')
            .parse_str("ABC\tX\thigh\n")
            .expect_err("priority must be numeric");
        assert!(matches!(err, MappingFileError::Malformed { line: 1, .. }));
    }

    #[test]
    fn pipe_rows_and_dash_numbers() {
        let rows = parse_pipe_rows("m123456|m123456-1|m123456-12A\n\n").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].old_dash(), Some("1"));
        assert_eq!(rows[0].new_dash(), Some("12A"));
        assert_eq!(dash_number("m123456-123"), None);
        assert_eq!(dash_number("layer-1"), None);
    }

    #[test]
    fn pipe_rows_require_three_fields() {
        let err = parse_pipe_rows("m123456|m123456-1\n").expect_err("two fields");
        assert!(matches!(err, MappingFileError::Malformed { line: 1, .. }));
    }

    #[test]
    fn structured_mapping_per_file() {
        let xml = r#"<?xml version="1.0"?>
            <mapping>
              <file oldfname="a.dwg" newfname="b.dwg">
                <map reftype="figure" old="2-1" new="WP0004-1"/>
                <map reftype="wp" old="x" new="WP0004"/>
                <map reftype="figure" old="2-1" new="ignored"/>
              </file>
              <file oldfname="c.dwg" newfname="d.dwg">
                <map reftype="table" old="3-2" new="WP0007-2"/>
              </file>
            </mapping>"#;
        let mapping = StructuredMapping::parse(xml).expect("parse");
        assert!(mapping.is_per_file());
        assert_eq!(mapping.files.len(), 2);
        let first = mapping.map_for("A.DWG").expect("case-insensitive match");
        assert_eq!(first.lookup(RefType::Figure, "2-1"), Some("WP0004-1"));
        assert_eq!(first.work_package(), Some("WP0004"));
        assert_eq!(mapping.ignored_duplicates, 1);
        assert!(mapping.map_for("missing.dwg").is_none());
    }

    #[test]
    fn structured_mapping_pools_rows_without_files() {
        let xml = r#"<mapping>
                <map reftype="chapter" old="2" new="5"/>
                <map reftype="chapter" old="2" new="9"/>
                <map reftype="unknown" old="1" new="1"/>
            </mapping>"#;
        let mapping = StructuredMapping::parse(xml).expect("parse");
        assert!(!mapping.is_per_file());
        let pooled = mapping.map_for("anything.dwg").expect("pooled");
        assert_eq!(pooled.lookup(RefType::Chapter, "2"), Some("5"));
        assert_eq!(pooled.len(), 1);
    }

    #[test]
    fn structured_mapping_reports_missing_attribute() {
        let err = StructuredMapping::parse(r#"<file oldfname="a.dwg"></file>"#)
            .expect_err("newfname missing");
        assert!(matches!(
            err,
            MappingFileError::MissingAttribute {
                element: "file",
                attribute: "newfname"
            }
        ));
    }
}
