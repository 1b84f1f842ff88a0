use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use threaded_fileio::{IoConfig, RequestContext, ThreadPool, ThreadPoolConfig, ThreadPoolRegistry};

use super::logger::init_test_logger;

/// A scratch directory plus a private worker pool, so task counts seen by one
/// test are never shared with another.
pub struct TestContext {
    pub dir: TempDir,
    pub pool: Arc<ThreadPool>,
    pub registry: Arc<ThreadPoolRegistry>,
}

impl TestContext {
    pub fn new() -> Self {
        init_test_logger();
        let dir = TempDir::new().expect("create temp dir");
        let mut registry = ThreadPoolRegistry::new();
        let pool = registry.add(
            ThreadPool::new(&ThreadPoolConfig::new("default", 4, 1024)).expect("spawn pool"),
        );
        Self {
            dir,
            pool,
            registry: Arc::new(registry),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn request(&self) -> RequestContext {
        self.request_with(IoConfig::default())
    }

    pub fn request_with(&self, config: IoConfig) -> RequestContext {
        RequestContext::new(config, Arc::clone(&self.registry))
    }

    /// Tasks handed to the pool so far.
    pub fn submitted(&self) -> u64 {
        self.pool.stats().submitted
    }

    pub fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).expect("seed file");
        path
    }

    pub fn read_file(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.path(name)).expect("read back file")
    }
}
