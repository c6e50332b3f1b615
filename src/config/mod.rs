//! Configuration types and loading

mod loader;
mod types;

pub use loader::{load, load_file, load_str};
pub use types::{Config, LogConfig};
