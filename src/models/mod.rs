// Domain records shared by ingestion, storage and alerting
pub mod alert;
pub mod snapshot;

pub use alert::{AlertCandidate, AlertEvent, AlertStatus, AlertType, ProtocolAlert, Severity};
pub use snapshot::ProtocolSnapshot;
