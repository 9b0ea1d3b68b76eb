use std::collections::BTreeMap;
use std::path::Path;

use rpstl_io::mapping::{MappingRow, MappingSource};
use tracing::{debug, info};

use crate::errors::EngineError;

/// 按旧键长度降序排列的映射表；批处理期间只读。
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    rows: Vec<MappingRow>,
}

impl MappingTable {
    /// 空旧键会匹配任何图层，直接丢弃。排序是稳定的，同长度的行保持原始顺序。
    pub fn new(rows: Vec<MappingRow>) -> Self {
        let mut rows: Vec<MappingRow> = rows
            .into_iter()
            .filter(|row| {
                let keep = !row.legacy_key.trim().is_empty();
                if !keep {
                    debug!(new_key = %row.new_key, "忽略旧键为空的映射行");
                }
                keep
            })
            .collect();
        rows.sort_by(|a, b| b.legacy_key.trim().len().cmp(&a.legacy_key.trim().len()));
        Self { rows }
    }

    pub fn load(source: &dyn MappingSource, path: &Path) -> Result<Self, EngineError> {
        let rows = source.load_rows(path)?;
        info!(path = %path.display(), rows = rows.len(), "映射表已加载");
        Ok(Self::new(rows))
    }

    /// 最长前缀匹配，比较时去除首尾空白并忽略 ASCII 大小写。
    pub fn resolve(&self, key: &str) -> Option<&MappingRow> {
        let key = key.trim().to_ascii_lowercase();
        self.rows
            .iter()
            .find(|row| key.starts_with(&row.legacy_key.trim().to_ascii_lowercase()))
    }

    pub fn rows(&self) -> &[MappingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 申请目标图层的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Granted,
    /// 新申请者胜出，原持有者需要删除。
    Displaced { loser: String, loser_priority: i32 },
    /// 已有持有者胜出，申请者需要删除。
    Rejected { winner: String, winner_priority: i32 },
}

/// 记录本次重写中每个新键由哪个旧图层持有。
///
/// 优先级数值低者落败；相同时后处理的图层胜出。
#[derive(Debug, Default)]
pub struct DestinationClaims {
    holders: BTreeMap<String, (String, i32)>,
}

impl DestinationClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, new_key: &str, layer: &str, priority: i32) -> Claim {
        match self.holders.get_mut(new_key) {
            None => {
                self.holders
                    .insert(new_key.to_string(), (layer.to_string(), priority));
                Claim::Granted
            }
            Some(holder) if priority >= holder.1 => {
                let (loser, loser_priority) =
                    std::mem::replace(holder, (layer.to_string(), priority));
                Claim::Displaced {
                    loser,
                    loser_priority,
                }
            }
            Some(holder) => Claim::Rejected {
                winner: holder.0.clone(),
                winner_priority: holder.1,
            },
        }
    }

    pub fn holder(&self, new_key: &str) -> Option<&str> {
        self.holders.get(new_key).map(|(layer, _)| layer.as_str())
    }

    /// 新键 → 胜出的旧图层。
    pub fn into_winners(self) -> BTreeMap<String, String> {
        self.holders
            .into_iter()
            .map(|(key, (layer, _))| (key, layer))
            .collect()
    }
}
