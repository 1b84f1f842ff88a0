//! Configuration for the file I/O engine.
//!
//! `IoConfig` carries the per-location knobs a script's file handles obey,
//! `ThreadPoolConfig` describes one named worker pool. Both can be loaded
//! together from a TOML document through [`Settings`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default size of read and write buffers: one memory page.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Name of the worker pool used when none is configured.
pub const DEFAULT_THREAD_POOL: &str = "default";

/// Maximum number of scatter/gather spans handed to a single write syscall.
pub const IOVS_PREALLOCATE: usize = 64;

pub const DEFAULT_POOL_THREADS: usize = 32;
pub const DEFAULT_POOL_MAX_QUEUE: usize = 65536;

/// Size of the arena blocks buffers are carved from.
pub const ARENA_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Capacity of each buffer used for read look-ahead.
    pub read_buffer_size: usize,
    /// Capacity of the write cache; 0 dispatches every write immediately.
    pub write_buffer_size: usize,
    /// Worker pool that executes the blocking syscalls.
    pub thread_pool: String,
    /// Log every error returned to a caller at `error` level.
    pub log_errors: bool,
    /// Directory relative paths are resolved against.
    pub prefix: Option<PathBuf>,
    /// Cap on buffer memory reserved by one request, 0 for unlimited.
    pub memory_pool_size_mb: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            thread_pool: DEFAULT_THREAD_POOL.to_string(),
            log_errors: false,
            prefix: None,
            memory_pool_size_mb: 64,
        }
    }
}

impl IoConfig {
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.prefix {
            Some(prefix) if path.is_relative() => prefix.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_pool_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_thread_pool(mut self, name: impl Into<String>) -> Self {
        self.thread_pool = name.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub name: String,
    pub threads: usize,
    /// Tasks allowed to wait for a free worker before posting fails.
    pub max_queue: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_THREAD_POOL.to_string(),
            threads: DEFAULT_POOL_THREADS,
            max_queue: DEFAULT_POOL_MAX_QUEUE,
        }
    }
}

impl ThreadPoolConfig {
    pub fn new(name: impl Into<String>, threads: usize, max_queue: usize) -> Self {
        Self {
            name: name.into(),
            threads,
            max_queue,
        }
    }
}

/// Complete engine settings as found in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub io: IoConfig,
    pub thread_pools: Vec<ThreadPoolConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            io: IoConfig::default(),
            thread_pools: vec![ThreadPoolConfig::default()],
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
