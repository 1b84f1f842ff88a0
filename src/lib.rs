pub mod buffer;
pub mod common;
pub mod file;
pub mod request;
pub mod thread_pool;

pub use common::config::{IoConfig, Settings, ThreadPoolConfig};
pub use common::exception::{BusyOperation, FileResult, IoError};
pub use file::{FileHandle, OpenMode, ReadSpec, SessionState, SessionStatus};
pub use request::RequestContext;
pub use thread_pool::{ThreadPool, ThreadPoolRegistry};
