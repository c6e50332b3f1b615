//! I/O utilities for tunnel data transfer

pub mod copy;

pub use copy::{tunnel_copy, CopyResult};
