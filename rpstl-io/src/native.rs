use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use rpstl_core::document::Document;

use crate::{DocumentLoader, DocumentSaver, FormatVersion, IoError};

const FORMAT_TAG: &str = "rpstl-drawing";

/// JSON 原生图纸存储，外层包一层格式标记与版本号。
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeStore;

impl NativeStore {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: FormatVersion,
    document: &'a Document,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    #[serde(default)]
    version: FormatVersion,
    document: Document,
}

impl DocumentLoader for NativeStore {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let envelope: Envelope = serde_json::from_str(&data)
            .map_err(|err| IoError::InvalidDocument(format!("{}: {err}", path.display())))?;
        if envelope.format != FORMAT_TAG {
            return Err(IoError::InvalidDocument(format!(
                "{}: unexpected format tag {:?}",
                path.display(),
                envelope.format
            )));
        }
        debug!(path = %path.display(), version = %envelope.version, "读取原生图纸");
        Ok(envelope.document)
    }
}

impl DocumentSaver for NativeStore {
    fn save(&self, document: &Document, path: &Path, format: FormatVersion) -> Result<(), IoError> {
        let envelope = EnvelopeRef {
            format: FORMAT_TAG,
            version: format,
            document,
        };
        let data = serde_json::to_string_pretty(&envelope).map_err(|source| IoError::EncodeError {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}
