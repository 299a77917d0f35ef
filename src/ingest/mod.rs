//! Fetching and normalizing protocol metrics from the external source

pub mod clock;
pub mod fetcher;
pub mod normalizer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fetcher::{FetchError, Fetcher, HttpMetricsSource, MetricsSource, RawMetrics, RetryPolicy};
pub use normalizer::{truncate_to_cycle, ApyUnit, NormalizeError, Normalizer};
