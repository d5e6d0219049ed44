pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use error::VerdictError;
pub use types::{Address, Did, Digest32};
