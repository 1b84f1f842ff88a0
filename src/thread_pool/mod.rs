pub mod bridge;
pub mod pool;
pub mod task;

pub use bridge::{submit, PendingTask};
pub use pool::{ThreadPool, ThreadPoolRegistry, ThreadPoolStats};
pub use task::{FailureStage, Task, TaskFailure, TaskKind};
