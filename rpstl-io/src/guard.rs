use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use rpstl_core::document::Document;
use tracing::warn;

use crate::{DocumentLoader, IoError};

/// 在辅助线程上执行读取，调用方按固定间隔检查取消信号与超时。
///
/// 被放弃的读取线程不会被强行终止，只是不再等待其结果。
pub struct GuardedLoader {
    inner: Arc<dyn DocumentLoader + Send + Sync>,
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl GuardedLoader {
    pub fn new(inner: Arc<dyn DocumentLoader + Send + Sync>) -> Self {
        Self {
            inner,
            poll_interval: Duration::from_millis(50),
            deadline: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn load_with(
        &self,
        path: &Path,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<Document, IoError> {
        let (sender, receiver) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned = path.to_path_buf();
        thread::Builder::new()
            .name("rpstl-load".to_string())
            .spawn(move || {
                let _ = sender.send(inner.load(&owned));
            })
            .map_err(|source| IoError::ReadError {
                path: path.to_path_buf(),
                source,
            })?;

        let started = Instant::now();
        loop {
            match receiver.recv_timeout(self.poll_interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if is_cancelled() {
                        warn!(path = %path.display(), "读取图纸时收到取消信号");
                        return Err(IoError::Interrupted {
                            path: path.to_path_buf(),
                            reason: "cancelled".to_string(),
                        });
                    }
                    if let Some(limit) = self.deadline {
                        if started.elapsed() >= limit {
                            warn!(path = %path.display(), ?limit, "读取图纸超时");
                            return Err(IoError::Interrupted {
                                path: path.to_path_buf(),
                                reason: format!("no response after {limit:?}"),
                            });
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(IoError::Interrupted {
                        path: path.to_path_buf(),
                        reason: "loader thread stopped without a result".to_string(),
                    });
                }
            }
        }
    }
}

impl DocumentLoader for GuardedLoader {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        self.load_with(path, &|| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SlowLoader(Duration);

    impl DocumentLoader for SlowLoader {
        fn load(&self, _path: &Path) -> Result<Document, IoError> {
            thread::sleep(self.0);
            Ok(Document::new())
        }
    }

    #[test]
    fn fast_load_returns_document() {
        let loader = GuardedLoader::new(Arc::new(SlowLoader(Duration::from_millis(1))));
        let doc = loader.load(Path::new("fast.json")).expect("load");
        assert!(doc.has_layer("0"));
    }

    #[test]
    fn deadline_interrupts_hung_load() {
        let loader = GuardedLoader::new(Arc::new(SlowLoader(Duration::from_secs(5))))
            .with_poll_interval(Duration::from_millis(5))
            .with_deadline(Some(Duration::from_millis(30)));
        let err = loader.load(Path::new("slow.json")).expect_err("should time out");
        assert!(matches!(err, IoError::Interrupted { .. }));
    }

    #[test]
    fn cancellation_interrupts_load() {
        let cancelled = AtomicBool::new(true);
        let loader = GuardedLoader::new(Arc::new(SlowLoader(Duration::from_secs(5))))
            .with_poll_interval(Duration::from_millis(5));
        let err = loader
            .load_with(Path::new("slow.json"), &|| cancelled.load(Ordering::SeqCst))
            .expect_err("should be cancelled");
        match err {
            IoError::Interrupted { reason, .. } => assert_eq!(reason, "cancelled"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
