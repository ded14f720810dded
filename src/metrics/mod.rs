mod collector;

pub use collector::{MetricsCollector, MetricsRegistry, Timer};
