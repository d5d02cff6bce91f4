pub mod health;
pub mod logging;
pub mod metrics;

pub use self::health::{AggregatedHealth, DependencyHealth, HealthChecker, HealthStatus};
pub use self::logging::{init_logging, mask_sensitive, LogConfig, LogFormat};
pub use self::metrics::{get_metrics, init_metrics, LatencyTimer, Metrics, METRICS};
