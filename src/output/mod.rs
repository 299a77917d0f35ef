// Output module
pub mod table;

pub use table::{AlertRow, OutcomeRow, OutputFormat, SnapshotRow};
