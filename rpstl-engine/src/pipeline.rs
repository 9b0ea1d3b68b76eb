use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use rpstl_core::document::Document;
use rpstl_io::FormatVersion;
use tracing::debug;

use crate::errors::EngineError;
use crate::journal::Journal;

/// 长时间运行的调用可见的跨线程信号：取消标志与进度。
///
/// 只在明确的检查点读取（每个文件开始前、阶段之间），不会打断正在执行的阶段。
pub trait RunContext: Sync {
    fn is_cancelled(&self) -> bool;
    fn report_progress(&self, percent: u8);
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 不可取消、不汇报进度的上下文，供测试与单文件调用使用。
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContext;

impl RunContext for NullContext {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn report_progress(&self, _percent: u8) {}
}

/// 批处理线程的上下文，进度保存在共享的原子变量中。
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    token: CancellationToken,
    progress: Arc<AtomicU8>,
}

impl BatchContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }
}

impl RunContext for BatchContext {
    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn report_progress(&self, percent: u8) {
        self.progress.store(percent.min(100), Ordering::SeqCst);
    }
}

/// 正在处理的单个图纸。各阶段通过 `&mut` 依次修改，不存在全局的“当前文档”。
#[derive(Debug)]
pub struct WorkUnit {
    pub source: PathBuf,
    pub document: Document,
    /// 文档标识，例如 `m123456`；由标识阶段写入。
    pub identifier: Option<String>,
    /// 保存位置；为空时覆盖源文件。
    pub destination: Option<PathBuf>,
    pub format: FormatVersion,
    /// 除图纸外生成的文件（keyfile 等）。
    pub artifacts: Vec<PathBuf>,
    pub journal: Journal,
}

impl WorkUnit {
    pub fn new(source: impl Into<PathBuf>, document: Document, format: FormatVersion) -> Self {
        Self {
            source: source.into(),
            document,
            identifier: None,
            destination: None,
            format,
            artifacts: Vec::new(),
            journal: Journal::new(),
        }
    }

    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// 源文件扩展名（含点），没有扩展名时为空串。
    pub fn extension(&self) -> String {
        self.source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    pub fn folder(&self) -> &Path {
        self.source.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn save_path(&self) -> &Path {
        self.destination.as_deref().unwrap_or(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFlow {
    Continue,
    /// 提前结束当前文件，不保存。
    Skip(String),
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, unit: &mut WorkUnit, ctx: &dyn RunContext) -> Result<StageFlow, EngineError>;
}

/// 一个处理模式即一组按顺序执行的阶段。
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    persists: bool,
}

impl Pipeline {
    /// `persists` 为真时，批处理在全部阶段完成后保存图纸。
    pub fn new(persists: bool) -> Self {
        Self {
            stages: Vec::new(),
            persists,
        }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn persists(&self) -> bool {
        self.persists
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run(&self, unit: &mut WorkUnit, ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
        for stage in &self.stages {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            debug!(stage = stage.name(), source = %unit.source.display(), "执行阶段");
            if let StageFlow::Skip(reason) = stage.run(unit, ctx)? {
                debug!(stage = stage.name(), %reason, "提前结束当前文件");
                return Ok(StageFlow::Skip(reason));
            }
        }
        Ok(StageFlow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        flow: StageFlow,
        cancel: Option<CancellationToken>,
    }

    impl Stage for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&self, _unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
            self.seen.lock().expect("lock").push(self.name);
            if let Some(token) = &self.cancel {
                token.cancel();
            }
            Ok(self.flow.clone())
        }
    }

    fn unit() -> WorkUnit {
        WorkUnit::new("drawings/m123456.dxf", Document::new(), FormatVersion::default())
    }

    #[test]
    fn skip_stops_remaining_stages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(true)
            .with_stage(Recorder {
                name: "first",
                seen: seen.clone(),
                flow: StageFlow::Skip("bad name".to_string()),
                cancel: None,
            })
            .with_stage(Recorder {
                name: "second",
                seen: seen.clone(),
                flow: StageFlow::Continue,
                cancel: None,
            });
        let flow = pipeline.run(&mut unit(), &NullContext).expect("run");
        assert_eq!(flow, StageFlow::Skip("bad name".to_string()));
        assert_eq!(*seen.lock().expect("lock"), vec!["first"]);
        assert_eq!(pipeline.stage_names(), vec!["first", "second"]);
    }

    #[test]
    fn cancellation_is_checked_between_stages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let ctx = BatchContext::new(token.clone());
        let pipeline = Pipeline::new(false)
            .with_stage(Recorder {
                name: "first",
                seen: seen.clone(),
                flow: StageFlow::Continue,
                cancel: Some(token),
            })
            .with_stage(Recorder {
                name: "second",
                seen: seen.clone(),
                flow: StageFlow::Continue,
                cancel: None,
            });
        let err = pipeline.run(&mut unit(), &ctx).expect_err("cancelled");
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(*seen.lock().expect("lock"), vec!["first"]);
    }

    #[test]
    fn work_unit_paths() {
        let mut unit = unit();
        assert_eq!(unit.file_name(), "m123456.dxf");
        assert_eq!(unit.stem(), "m123456");
        assert_eq!(unit.extension(), ".dxf");
        assert_eq!(unit.save_path(), Path::new("drawings/m123456.dxf"));
        unit.destination = Some(PathBuf::from("drawings/m123456-3.dxf"));
        assert_eq!(unit.save_path(), Path::new("drawings/m123456-3.dxf"));

        let ctx = BatchContext::default();
        ctx.report_progress(140);
        assert_eq!(ctx.progress(), 100);
    }
}
