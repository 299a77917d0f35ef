pub mod evaluator;
pub mod notifications;
pub mod thresholds;

pub use evaluator::{tvl_drop_ratio, AnomalyEvaluator};
pub use notifications::{LogNotifier, NotificationError, Notifier, WebhookNotifier};
pub use thresholds::{LookbackWindow, ThresholdConfig};
