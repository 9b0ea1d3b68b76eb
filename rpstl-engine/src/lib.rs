pub mod associate;
pub mod batch;
pub mod classify;
pub mod journal;
pub mod keyfile;
pub mod mapping_table;
pub mod mode;
pub mod pipeline;
pub mod reftext;
pub mod rewrite;
pub mod spatial;
pub mod stages;

pub mod errors {
    use std::path::PathBuf;

    use rpstl_core::document::DocumentError;
    use rpstl_io::IoError;
    use rpstl_io::mapping::MappingFileError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error(transparent)]
        Io(#[from] IoError),
        #[error(transparent)]
        Mapping(#[from] MappingFileError),
        #[error(transparent)]
        Document(#[from] DocumentError),
        #[error("failed to encode report: {0}")]
        Encode(#[from] serde_json::Error),
        #[error("invalid pattern {pattern:?}: {source}")]
        InvalidPattern {
            pattern: String,
            #[source]
            source: regex::Error,
        },
        #[error("unknown mode: {0}")]
        UnknownMode(String),
        #[error("mode {mode} requires parameter {parameter:?}")]
        MissingParameter { mode: String, parameter: String },
        #[error("invalid value {value:?} for parameter {parameter:?}")]
        InvalidParameter { parameter: String, value: String },
        #[error("mapping input {path:?} is unavailable: {reason}")]
        InputUnavailable { path: PathBuf, reason: String },
        #[error("failed to write output {path:?}: {source}")]
        Output {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("failed to write keyfile XML: {0}")]
        Xml(String),
        #[error("failed to write log {path:?}: {source}")]
        Log {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("processing cancelled")]
        Cancelled,
        #[error("batch worker failed: {0}")]
        Worker(String),
    }
}

pub use batch::{BatchHandle, BatchRunner, BatchSummary, spawn_batch};
pub use errors::EngineError;
pub use mode::{MODES, ModeRequest, find_mode};
pub use pipeline::{BatchContext, CancellationToken, NullContext, RunContext};
