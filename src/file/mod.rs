pub mod filter;
pub mod handle;
pub mod mode;
pub mod session;

pub use filter::{FilterStatus, InputFilter, ReadSpec};
pub use handle::FileHandle;
pub use mode::OpenMode;
pub use session::{FileSession, SessionState, SessionStatus};
