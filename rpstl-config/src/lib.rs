use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。批处理期间只读，可在多个文件之间共享。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub layers: LayerConfig,
    #[serde(default)]
    pub association: AssociationConfig,
    #[serde(default)]
    pub prefix_note: PrefixNoteConfig,
    #[serde(default)]
    pub reference_zone: ReferenceZoneConfig,
    #[serde(default)]
    pub keyfile: KeyfileConfig,
    #[serde(default)]
    pub remap: RemapConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            layers: LayerConfig::default(),
            association: AssociationConfig::default(),
            prefix_note: PrefixNoteConfig::default(),
            reference_zone: ReferenceZoneConfig::default(),
            keyfile: KeyfileConfig::default(),
            remap: RemapConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `RPSTL_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("RPSTL_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 图层命名约定。
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    #[serde(default = "LayerConfig::default_base_layer")]
    pub base_layer: String,
    #[serde(default = "LayerConfig::default_marker_layer")]
    pub marker_layer: String,
    /// 语义图层前缀，编号与标注只在此类图层上识别。
    #[serde(default = "LayerConfig::default_semantic_prefix")]
    pub semantic_prefix: String,
    /// 需要重映射的旧框架图层（在去除首尾空白后的名称上匹配）。
    #[serde(default = "LayerConfig::default_candidate_pattern")]
    pub candidate_pattern: String,
    #[serde(default = "LayerConfig::default_shared_layers")]
    pub shared_annotation_layers: Vec<String>,
    #[serde(default = "LayerConfig::default_ignored_text_layers")]
    pub ignored_text_layers: Vec<String>,
}

impl LayerConfig {
    fn default_base_layer() -> String {
        "0".to_string()
    }

    fn default_marker_layer() -> String {
        "_GTYPE_RPSTL".to_string()
    }

    fn default_semantic_prefix() -> String {
        "m".to_string()
    }

    fn default_candidate_pattern() -> String {
        "^[A-Za-z].{14,}$".to_string()
    }

    fn default_shared_layers() -> Vec<String> {
        vec!["COUT".to_string()]
    }

    fn default_ignored_text_layers() -> Vec<String> {
        vec!["FILENAME".to_string(), "SCALE".to_string()]
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            base_layer: Self::default_base_layer(),
            marker_layer: Self::default_marker_layer(),
            semantic_prefix: Self::default_semantic_prefix(),
            candidate_pattern: Self::default_candidate_pattern(),
            shared_annotation_layers: Self::default_shared_layers(),
            ignored_text_layers: Self::default_ignored_text_layers(),
        }
    }
}

/// 标注与位号关联的容差，单位为图纸单位。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AssociationConfig {
    #[serde(default = "AssociationConfig::default_above_y_range")]
    pub above_y_range: f64,
    #[serde(default = "AssociationConfig::default_zone_range")]
    pub zone_x_range: f64,
    #[serde(default = "AssociationConfig::default_zone_range")]
    pub zone_y_range: f64,
    #[serde(default = "AssociationConfig::default_alignment_epsilon")]
    pub alignment_epsilon: f64,
}

impl AssociationConfig {
    fn default_above_y_range() -> f64 {
        0.1135
    }

    fn default_zone_range() -> f64 {
        0.15
    }

    fn default_alignment_epsilon() -> f64 {
        1e-6
    }
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            above_y_range: Self::default_above_y_range(),
            zone_x_range: Self::default_zone_range(),
            zone_y_range: Self::default_zone_range(),
            alignment_epsilon: Self::default_alignment_epsilon(),
        }
    }
}

/// 前缀说明续行的扫描范围。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PrefixNoteConfig {
    #[serde(default = "PrefixNoteConfig::default_max_gap_y")]
    pub max_gap_y: f64,
    #[serde(default = "PrefixNoteConfig::default_max_gap_x")]
    pub max_gap_x: f64,
}

impl PrefixNoteConfig {
    fn default_max_gap_y() -> f64 {
        0.5
    }

    fn default_max_gap_x() -> f64 {
        0.02
    }
}

impl Default for PrefixNoteConfig {
    fn default() -> Self {
        Self {
            max_gap_y: Self::default_max_gap_y(),
            max_gap_x: Self::default_max_gap_x(),
        }
    }
}

/// 引用文字替换时，围绕图号文字搜索相邻行的矩形。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReferenceZoneConfig {
    #[serde(default = "ReferenceZoneConfig::default_left_of_x")]
    pub left_of_x: f64,
    #[serde(default = "ReferenceZoneConfig::default_below_y")]
    pub below_y: f64,
    #[serde(default = "ReferenceZoneConfig::default_right_of_x")]
    pub right_of_x: f64,
    #[serde(default = "ReferenceZoneConfig::default_above_y")]
    pub above_y: f64,
    #[serde(default = "ReferenceZoneConfig::default_work_package_offset")]
    pub work_package_offset: f64,
    #[serde(default = "ReferenceZoneConfig::default_table_value_gap")]
    pub table_value_gap: f64,
    #[serde(default = "ReferenceZoneConfig::default_tm_value_gap")]
    pub tm_value_gap: f64,
}

impl ReferenceZoneConfig {
    fn default_left_of_x() -> f64 {
        0.04
    }

    fn default_below_y() -> f64 {
        0.33
    }

    fn default_right_of_x() -> f64 {
        0.8
    }

    fn default_above_y() -> f64 {
        0.29
    }

    fn default_work_package_offset() -> f64 {
        0.1
    }

    fn default_table_value_gap() -> f64 {
        1.0
    }

    fn default_tm_value_gap() -> f64 {
        0.14
    }
}

impl Default for ReferenceZoneConfig {
    fn default() -> Self {
        Self {
            left_of_x: Self::default_left_of_x(),
            below_y: Self::default_below_y(),
            right_of_x: Self::default_right_of_x(),
            above_y: Self::default_above_y(),
            work_package_offset: Self::default_work_package_offset(),
            table_value_gap: Self::default_table_value_gap(),
            tm_value_gap: Self::default_tm_value_gap(),
        }
    }
}

/// 关键文件（keyfile）输出选项。
#[derive(Debug, Clone, Deserialize)]
pub struct KeyfileConfig {
    #[serde(default = "KeyfileConfig::default_version")]
    pub version: String,
    #[serde(default = "KeyfileConfig::default_decimal_places")]
    pub decimal_places: u32,
    /// 无法取得几何范围时，每个字符宽度相对字高的比例。
    #[serde(default = "KeyfileConfig::default_char_width_ratio")]
    pub char_width_ratio: f64,
    /// 文件名（不含扩展名）长度达到该值的图纸不生成 keyfile。
    #[serde(default = "KeyfileConfig::default_max_stem_len")]
    pub max_stem_len: usize,
    #[serde(default = "KeyfileConfig::default_file_suffix")]
    pub file_suffix: String,
}

impl KeyfileConfig {
    fn default_version() -> String {
        "2.0".to_string()
    }

    fn default_decimal_places() -> u32 {
        3
    }

    fn default_char_width_ratio() -> f64 {
        1.0
    }

    fn default_max_stem_len() -> usize {
        15
    }

    fn default_file_suffix() -> String {
        "_key.xml".to_string()
    }
}

impl Default for KeyfileConfig {
    fn default() -> Self {
        Self {
            version: Self::default_version(),
            decimal_places: Self::default_decimal_places(),
            char_width_ratio: Self::default_char_width_ratio(),
            max_stem_len: Self::default_max_stem_len(),
            file_suffix: Self::default_file_suffix(),
        }
    }
}

/// 图层重映射前的图框清理。
#[derive(Debug, Clone, Deserialize)]
pub struct RemapConfig {
    /// y 坐标不高于该值的文字视为图框底部说明，删除。
    #[serde(default = "RemapConfig::default_caption_band_low")]
    pub caption_band_low: f64,
    #[serde(default = "RemapConfig::default_caption_band_high")]
    pub caption_band_high: f64,
    #[serde(default = "RemapConfig::default_caption_block_prefix")]
    pub caption_block_prefix: String,
}

impl RemapConfig {
    fn default_caption_band_low() -> f64 {
        1.125
    }

    fn default_caption_band_high() -> f64 {
        10.375
    }

    fn default_caption_block_prefix() -> String {
        "FCL1".to_string()
    }
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            caption_band_low: Self::default_caption_band_low(),
            caption_band_high: Self::default_caption_band_high(),
            caption_block_prefix: Self::default_caption_block_prefix(),
        }
    }
}

/// 批处理驱动参数。
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "BatchConfig::default_log_suffix")]
    pub log_file_suffix: String,
    /// 单个图纸读取的最长等待时间（秒），缺省不限时。
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,
    #[serde(default = "BatchConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "BatchConfig::default_extensions")]
    pub extensions: Vec<String>,
}

impl BatchConfig {
    fn default_log_suffix() -> String {
        "_log.txt".to_string()
    }

    fn default_poll_interval_ms() -> u64 {
        50
    }

    fn default_extensions() -> Vec<String> {
        vec!["json".to_string(), "dxf".to_string()]
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            log_file_suffix: Self::default_log_suffix(),
            load_timeout_secs: None,
            poll_interval_ms: Self::default_poll_interval_ms(),
            extensions: Self::default_extensions(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
