pub mod cleanup;
pub mod files;
pub mod health;
pub mod process;
pub mod types;
pub mod upload;

pub use types::*;
