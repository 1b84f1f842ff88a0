pub mod context;
pub mod macros;
