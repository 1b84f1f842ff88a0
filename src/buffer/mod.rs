pub mod buf;
pub mod buffer_pool;
pub mod chain;
pub mod iovec;

pub use buf::Buf;
pub use buffer_pool::{BufferPool, BufferPoolStats};
pub use chain::BufChain;
pub use iovec::{chain_to_iovec, coalesce_adjacent, IoVec};
