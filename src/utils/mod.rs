// Utility functions module
pub mod format;

pub use format::*;
