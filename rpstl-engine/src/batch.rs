//! 批处理驱动：逐个图纸读取、执行阶段、保存并写日志，运行在独立的工作线程上。

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rpstl_config::BatchConfig;
use rpstl_io::{DocumentLoader, DrawingStore, FormatVersion, GuardedLoader};
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::journal::{Journal, LogArtifact};
use crate::mode::{BatchPlan, Job};
use crate::pipeline::{BatchContext, CancellationToken, RunContext, StageFlow, WorkUnit};

/// 耗时文字：一分钟以内用秒，否则用分钟，均保留两位小数。
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds < 60.0 {
        format!("{seconds:.2} seconds")
    } else {
        format!("{:.2} minutes", seconds / 60.0)
    }
}

pub fn progress_percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (current as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOutcome {
    pub source: PathBuf,
    pub status: ProcessingStatus,
    /// 实际写出的图纸路径。
    pub saved: Option<PathBuf>,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total: usize,
    pub outcomes: Vec<ProcessingOutcome>,
    pub elapsed: Duration,
    /// 日志没有内容时文件被删除，此处为空。
    pub log_path: Option<PathBuf>,
}

impl BatchSummary {
    /// 已经进入处理（未因取消而跳过）的图纸数。
    pub fn processed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status != ProcessingStatus::Cancelled)
            .count()
    }

    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.count(ProcessingStatus::Cancelled) > 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} out of {} drawings processed in {}.",
            self.processed(),
            self.total,
            format_elapsed(self.elapsed)
        )?;
        match &self.log_path {
            Some(path) => write!(f, " Error log: {}", path.display()),
            None => write!(f, " No errors found."),
        }
    }
}

pub struct BatchRunner<S> {
    store: Arc<S>,
    loader: GuardedLoader,
}

impl<S> BatchRunner<S>
where
    S: DrawingStore + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        let inner: Arc<dyn DocumentLoader + Send + Sync> = store.clone();
        Self {
            store,
            loader: GuardedLoader::new(inner),
        }
    }

    pub fn with_config(store: Arc<S>, config: &BatchConfig) -> Self {
        let mut runner = Self::new(store);
        runner.loader = runner
            .loader
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_deadline(config.load_timeout_secs.map(Duration::from_secs));
        runner
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 顺序处理计划中的所有图纸。单个图纸的错误只写入日志，不会中止批次；
    /// 只有日志文件本身无法写入时返回错误。
    pub fn run(&self, plan: &BatchPlan, ctx: &dyn RunContext) -> Result<BatchSummary, EngineError> {
        let started = Instant::now();
        let total = plan.jobs.len();
        let mut log = LogArtifact::create(&plan.log_path)?;
        info!(mode = plan.mode.id, total, log = %plan.log_path.display(), "批处理开始");

        let mut planning = Journal::new();
        for note in &plan.notes {
            planning.record(note.clone());
        }
        log.append(&mut planning)?;

        let mut outcomes = Vec::with_capacity(total);
        for (index, job) in plan.jobs.iter().enumerate() {
            if ctx.is_cancelled() {
                let mut journal = Journal::new();
                journal.record(format!(
                    "Processing cancelled by user at drawing {} out of {total}",
                    index + 1
                ));
                log.append(&mut journal)?;
                outcomes.extend(plan.jobs[index..].iter().map(|job| ProcessingOutcome {
                    source: job.source.clone(),
                    status: ProcessingStatus::Cancelled,
                    saved: None,
                    artifacts: Vec::new(),
                }));
                break;
            }

            let mut journal = Journal::new();
            let outcome = self.process(plan, job, ctx, &mut journal);
            log.append(&mut journal)?;
            debug!(source = %job.source.display(), status = ?outcome.status, "图纸处理结束");
            outcomes.push(outcome);
            ctx.report_progress(progress_percent(index + 1, total));
        }

        let summary = BatchSummary {
            total,
            outcomes,
            elapsed: started.elapsed(),
            log_path: log.finish()?,
        };
        info!(
            mode = plan.mode.id,
            processed = summary.processed(),
            failed = summary.count(ProcessingStatus::Failed),
            skipped = summary.count(ProcessingStatus::Skipped),
            "批处理结束"
        );
        Ok(summary)
    }

    fn process(
        &self,
        plan: &BatchPlan,
        job: &Job,
        ctx: &dyn RunContext,
        journal: &mut Journal,
    ) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome {
            source: job.source.clone(),
            status: ProcessingStatus::Failed,
            saved: None,
            artifacts: Vec::new(),
        };
        let document = match self.loader.load_with(&job.source, &|| ctx.is_cancelled()) {
            Ok(document) => document,
            Err(err) => {
                warn!(source = %job.source.display(), error = %err, "读取图纸失败");
                journal.record(format!("{}: {err}", job.source.display()));
                return outcome;
            }
        };

        let mut unit = WorkUnit::new(job.source.clone(), document, FormatVersion::default());
        unit.destination = job.destination.clone();
        let flow = plan.pipeline.run(&mut unit, ctx);
        outcome.artifacts = std::mem::take(&mut unit.artifacts);
        journal.absorb(std::mem::take(&mut unit.journal), "");

        match flow {
            Ok(StageFlow::Skip(reason)) => {
                debug!(source = %job.source.display(), %reason, "跳过图纸");
                outcome.status = ProcessingStatus::Skipped;
            }
            Ok(StageFlow::Continue) if !plan.pipeline.persists() => {
                outcome.status = ProcessingStatus::Completed;
            }
            Ok(StageFlow::Continue) => match self.persist(&unit) {
                Ok(path) => {
                    outcome.status = ProcessingStatus::Completed;
                    outcome.saved = Some(path);
                }
                Err(err) => {
                    error!(source = %job.source.display(), error = %err, "保存图纸失败");
                    journal.record(format!("{}: {err}", unit.file_name()));
                }
            },
            Err(EngineError::Cancelled) => {
                journal.record(format!(
                    "Processing cancelled by user while processing {}",
                    unit.file_name()
                ));
                outcome.status = ProcessingStatus::Cancelled;
            }
            Err(err) => {
                error!(source = %job.source.display(), error = %err, "处理图纸失败");
                journal.record(format!("{}: {err}", unit.file_name()));
            }
        }
        outcome
    }

    fn persist(&self, unit: &WorkUnit) -> Result<PathBuf, EngineError> {
        let path = unit.save_path().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            create_parent(parent)?;
        }
        self.store.save(&unit.document, &path, unit.format)?;
        info!(path = %path.display(), format = %unit.format, "图纸已保存");
        Ok(path)
    }
}

fn create_parent(parent: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(parent).map_err(|source| EngineError::Output {
        path: parent.to_path_buf(),
        source,
    })
}

/// 正在运行的批处理。取消只在检查点生效，`join` 等待线程结束。
pub struct BatchHandle {
    context: BatchContext,
    join: JoinHandle<Result<BatchSummary, EngineError>>,
}

impl BatchHandle {
    pub fn cancel(&self) {
        self.context.token().cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.context.token().clone()
    }

    pub fn progress(&self) -> u8 {
        self.context.progress()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn join(self) -> Result<BatchSummary, EngineError> {
        self.join
            .join()
            .map_err(|_| EngineError::Worker("batch thread panicked".to_string()))?
    }
}

pub fn spawn_batch<S>(runner: BatchRunner<S>, plan: BatchPlan) -> Result<BatchHandle, EngineError>
where
    S: DrawingStore + Send + Sync + 'static,
{
    let context = BatchContext::new(CancellationToken::new());
    let worker_context = context.clone();
    let join = thread::Builder::new()
        .name("rpstl-batch".to_string())
        .spawn(move || runner.run(&plan, &worker_context))
        .map_err(|err| EngineError::Worker(err.to_string()))?;
    Ok(BatchHandle { context, join })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpstl_core::document::Document;
    use rpstl_io::{DocumentSaver, NativeStore};

    use crate::mode::find_mode;
    use crate::pipeline::{NullContext, Pipeline, Stage};

    struct Rename;

    impl Stage for Rename {
        fn name(&self) -> &'static str {
            "rename"
        }

        fn run(&self, unit: &mut WorkUnit, _ctx: &dyn RunContext) -> Result<StageFlow, EngineError> {
            if unit.stem() == "skip" {
                return Ok(StageFlow::Skip("asked to".to_string()));
            }
            unit.document.ensure_layer("visited");
            unit.destination = Some(unit.folder().join("out").join(unit.file_name()));
            Ok(StageFlow::Continue)
        }
    }

    fn plan(dir: &Path, jobs: Vec<Job>) -> BatchPlan {
        BatchPlan {
            mode: find_mode("lowercase-layers").expect("registered mode"),
            jobs,
            pipeline: Pipeline::new(true).with_stage(Rename),
            log_path: dir.join("test_log.txt"),
            notes: Vec::new(),
        }
    }

    fn seed(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        NativeStore::new()
            .save(&Document::new(), &path, FormatVersion::default())
            .expect("seed drawing");
        path
    }

    #[test]
    fn elapsed_and_progress_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(1_500)), "1.50 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(90)), "1.50 minutes");
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn summary_mentions_log_only_when_kept() {
        let mut summary = BatchSummary {
            total: 2,
            outcomes: vec![ProcessingOutcome {
                source: PathBuf::from("a.json"),
                status: ProcessingStatus::Completed,
                saved: None,
                artifacts: Vec::new(),
            }],
            elapsed: Duration::from_secs(2),
            log_path: None,
        };
        assert_eq!(
            summary.to_string(),
            "1 out of 2 drawings processed in 2.00 seconds. No errors found."
        );
        summary.log_path = Some(PathBuf::from("remap_log.txt"));
        assert_eq!(
            summary.to_string(),
            "1 out of 2 drawings processed in 2.00 seconds. Error log: remap_log.txt"
        );
    }

    #[test]
    fn failures_are_logged_and_batch_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = seed(dir.path(), "good.json");
        let skipped = seed(dir.path(), "skip.json");
        let missing = dir.path().join("missing.json");
        let runner = BatchRunner::new(Arc::new(NativeStore::new()));
        let plan = plan(
            dir.path(),
            vec![Job::new(&missing), Job::new(&good), Job::new(&skipped)],
        );

        let summary = runner.run(&plan, &NullContext).expect("run");
        assert_eq!(summary.processed(), 3);
        assert_eq!(summary.count(ProcessingStatus::Failed), 1);
        assert_eq!(summary.count(ProcessingStatus::Completed), 1);
        assert_eq!(summary.count(ProcessingStatus::Skipped), 1);

        let saved = dir.path().join("out").join("good.json");
        let reloaded = NativeStore::new().load(&saved).expect("saved drawing");
        assert!(reloaded.has_layer("visited"));

        let log = summary.log_path.expect("log kept");
        let content = fs::read_to_string(log).expect("read log");
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("missing.json"));
    }

    #[test]
    fn cancelled_batch_stops_before_next_drawing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = seed(dir.path(), "first.json");
        let second = seed(dir.path(), "second.json");
        let runner = BatchRunner::new(Arc::new(NativeStore::new()));
        let plan = plan(dir.path(), vec![Job::new(first), Job::new(second)]);

        let context = BatchContext::new(CancellationToken::new());
        context.token().cancel();
        let summary = runner.run(&plan, &context).expect("run");
        assert_eq!(summary.processed(), 0);
        assert!(summary.was_cancelled());
        let log = fs::read_to_string(summary.log_path.expect("log kept")).expect("read log");
        assert!(log.starts_with("Processing cancelled by user at drawing 1 out of 2"));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn spawned_batch_reports_full_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let only = seed(dir.path(), "only.json");
        let runner = BatchRunner::new(Arc::new(NativeStore::new()));
        let handle = spawn_batch(runner, plan(dir.path(), vec![Job::new(only)])).expect("spawn");
        let progress = handle.token();
        let summary = handle.join().expect("join");
        assert!(!progress.is_cancelled());
        assert_eq!(summary.count(ProcessingStatus::Completed), 1);
        assert!(summary.log_path.is_none());
        assert!(!dir.path().join("test_log.txt").exists());
    }
}
