use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use rpstl_core::document::Document;

mod dxf;
mod guard;
pub mod mapping;
mod native;

pub use dxf::DxfFacade;
pub use guard::GuardedLoader;
pub use native::NativeStore;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode drawing for {path:?}: {source}")]
    EncodeError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("reading {path:?} was interrupted: {reason}")]
    Interrupted { path: PathBuf, reason: String },
}

/// 宿主图纸格式版本，保存时写入文件头。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FormatVersion {
    R2000,
    R2004,
    R2007,
    R2010,
    R2013,
    #[default]
    R2018,
}

impl FormatVersion {
    pub const ALL: [FormatVersion; 6] = [
        FormatVersion::R2000,
        FormatVersion::R2004,
        FormatVersion::R2007,
        FormatVersion::R2010,
        FormatVersion::R2013,
        FormatVersion::R2018,
    ];

    pub fn acad_version(self) -> &'static str {
        match self {
            FormatVersion::R2000 => "AC1015",
            FormatVersion::R2004 => "AC1018",
            FormatVersion::R2007 => "AC1021",
            FormatVersion::R2010 => "AC1024",
            FormatVersion::R2013 => "AC1027",
            FormatVersion::R2018 => "AC1032",
        }
    }

    pub fn from_acad_version(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|version| version.acad_version() == code.trim())
    }

    /// 解析 `2000`、`r2000`、`AC1015` 等写法。
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Some(version) = Self::from_acad_version(&trimmed.to_ascii_uppercase()) {
            return Some(version);
        }
        let digits = trimmed.trim_start_matches(['r', 'R']);
        Self::ALL
            .into_iter()
            .find(|version| version.label() == digits)
    }

    pub fn label(self) -> &'static str {
        match self {
            FormatVersion::R2000 => "2000",
            FormatVersion::R2004 => "2004",
            FormatVersion::R2007 => "2007",
            FormatVersion::R2010 => "2010",
            FormatVersion::R2013 => "2013",
            FormatVersion::R2018 => "2018",
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.label())
    }
}

pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError>;
}

pub trait DocumentSaver {
    /// 保存会截断并覆盖目标文件。
    fn save(&self, document: &Document, path: &Path, format: FormatVersion) -> Result<(), IoError>;
}

/// 同时具备读写能力的图纸存储。
pub trait DrawingStore: DocumentLoader + DocumentSaver {}

impl<T: DocumentLoader + DocumentSaver> DrawingStore for T {}

/// 按扩展名分派：`.dxf` 走 DXF 子集，其余走 JSON 原生格式。
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoStore;

impl AutoStore {
    pub fn new() -> Self {
        Self
    }

    fn is_dxf(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dxf"))
    }
}

impl DocumentLoader for AutoStore {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        if Self::is_dxf(path) {
            DxfFacade::new().load(path)
        } else {
            NativeStore::new().load(path)
        }
    }
}

impl DocumentSaver for AutoStore {
    fn save(&self, document: &Document, path: &Path, format: FormatVersion) -> Result<(), IoError> {
        if Self::is_dxf(path) {
            DxfFacade::new().save(document, path, format)
        } else {
            NativeStore::new().save(document, path, format)
        }
    }
}
