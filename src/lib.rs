pub mod config;
pub mod config_validator;
pub mod error;
pub mod gate;
pub mod matcher;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod retry;
pub mod rule_set;
pub mod throttler;
pub mod token_bucket;
pub mod transport;

pub use config::ThrottlerConfig;
pub use error::{ThrottlerError, ThrottlerResult};
pub use gate::{Admission, PendingRequest, RequestGate};
pub use matcher::Matcher;
pub use metrics::{MetricsCollector, ThrottleMetrics};
pub use middleware::{ThrottleLayer, ThrottleService};
pub use rate_limit_config::{BucketSize, RateLimitRule};
pub use retry::{RetryPolicy, RetryState, Verdict};
pub use rule_set::{Rule, RuleSet};
pub use throttler::Throttler;
pub use token_bucket::TokenBucket;
pub use transport::{ResponseStatus, Target};
