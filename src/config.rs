use serde_json::Value;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::config_validator::ConfigValidator;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::gate::DEFAULT_REQUEST_DELAY;
use crate::rate_limit_config::RateLimitRule;
use crate::retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL};
use crate::rule_set::RuleSet;

pub const CONFIG_FILE_ENV: &str = "THROTTLER_CONFIG_FILE";
pub const REQUEST_DELAY_ENV: &str = "THROTTLER_REQUEST_DELAY";
pub const RETRY_INTERVAL_ENV: &str = "THROTTLER_RETRY_INTERVAL";
pub const MAX_RETRIES_ENV: &str = "THROTTLER_MAX_RETRIES";

/// Everything needed to build a [`crate::Throttler`].
pub struct ThrottlerConfig<R> {
    /// Rules in priority order.
    pub rules: Vec<RateLimitRule<R>>,

    /// How often a deferred request re-checks its bucket.
    pub request_delay: Duration,

    /// Delay before resubmitting a request answered with 429. `None` disables retry.
    pub retry_interval: Option<Duration>,

    /// Upper bound on resubmissions per request. `None` means unbounded.
    pub max_retries: Option<u32>,
}

impl<R> Default for ThrottlerConfig<R> {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            request_delay: DEFAULT_REQUEST_DELAY,
            retry_interval: Some(DEFAULT_RETRY_INTERVAL),
            max_retries: None,
        }
    }
}

impl<R> Clone for ThrottlerConfig<R> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            request_delay: self.request_delay,
            retry_interval: self.retry_interval,
            max_retries: self.max_retries,
        }
    }
}

impl<R> std::fmt::Debug for ThrottlerConfig<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlerConfig")
            .field("rules", &self.rules)
            .field("request_delay", &self.request_delay)
            .field("retry_interval", &self.retry_interval)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<R> ThrottlerConfig<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: RateLimitRule<R>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules<I>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = RateLimitRule<R>>,
    {
        self.rules.extend(rules);
        self
    }

    pub fn with_request_delay(mut self, request_delay: Duration) -> Self {
        self.request_delay = request_delay;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Option<Duration>) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Surface 429 responses to the caller instead of resubmitting.
    pub fn without_retry(self) -> Self {
        self.with_retry_interval(None)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_interval).with_max_retries(self.max_retries)
    }

    /// Check the global settings and every rule, including rule placement.
    pub fn validate(&self) -> ThrottlerResult<()> {
        ConfigValidator::validate_request_delay(self.request_delay)?;
        ConfigValidator::validate_retry_interval(self.retry_interval)?;
        RuleSet::from_rules(self.rules.iter().cloned())?;
        Ok(())
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> ThrottlerResult<Self> {
        let doc: Value = serde_json::from_str(json)?;
        let config = ConfigValidator::parse_config(&doc)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> ThrottlerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Load configuration from environment variables.
    ///
    /// Starts from the file named by `THROTTLER_CONFIG_FILE` when set, then
    /// applies the individual overrides.
    pub fn from_env() -> ThrottlerResult<Self> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(value) = env::var(REQUEST_DELAY_ENV) {
            config.request_delay = ConfigValidator::parse_duration_str("requestDelay", &value)?;
        }
        if let Ok(value) = env::var(RETRY_INTERVAL_ENV) {
            config.retry_interval = ConfigValidator::parse_retry_interval_str(&value)?;
        }
        if let Ok(value) = env::var(MAX_RETRIES_ENV) {
            let max_retries = value.trim().parse::<u32>().map_err(|_| {
                ThrottlerError::ConfigurationError(format!(
                    "Invalid value '{}' for {}",
                    value, MAX_RETRIES_ENV
                ))
            })?;
            config.max_retries = Some(max_retries);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;

    #[test]
    fn test_default_config() {
        let config = ThrottlerConfig::<String>::default();
        assert!(config.rules.is_empty());
        assert_eq!(config.request_delay, Duration::from_millis(50));
        assert_eq!(config.retry_interval, Some(Duration::from_millis(50)));
        assert_eq!(config.max_retries, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_retry_policy() {
        let config = ThrottlerConfig::<String>::new()
            .with_rule(RateLimitRule::matching(Matcher::substring("api")))
            .with_request_delay(Duration::from_millis(10))
            .with_max_retries(3);

        assert_eq!(config.rules.len(), 1);
        let policy = config.retry_policy();
        assert!(policy.is_enabled());
        assert_eq!(policy.max_retries(), Some(3));

        let policy = config.without_retry().retry_policy();
        assert!(!policy.is_enabled());
    }

    #[test]
    fn test_validate_rejects_zero_request_delay() {
        let config = ThrottlerConfig::<String>::new().with_request_delay(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ThrottlerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_misplaced_catch_all() {
        let config = ThrottlerConfig::<String>::new().with_rules(vec![
            RateLimitRule::matching(Matcher::substring("api")),
            RateLimitRule::catch_all(),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ThrottlerError::CatchAllConflict { index: 1 })
        ));
    }

    #[test]
    fn test_oversized_durations_are_configuration_errors() {
        let token_interval = ThrottlerConfig::<String>::from_json_str(
            r#"{ "rules": [{ "match": "a", "tokenInterval": 1e30 }] }"#,
        );
        assert!(matches!(
            token_interval,
            Err(ThrottlerError::InvalidRule { index: 0, .. })
        ));

        let request_delay = ThrottlerConfig::<String>::from_json_str(r#"{ "requestDelay": 1e30 }"#);
        assert!(matches!(
            request_delay,
            Err(ThrottlerError::ConfigurationError(_))
        ));

        let retry_interval = ThrottlerConfig::<String>::from_json_str(r#"{ "retryInterval": 1e30 }"#);
        assert!(matches!(
            retry_interval,
            Err(ThrottlerError::ConfigurationError(_))
        ));

        let config = ThrottlerConfig::<String>::new().with_retry_interval(Some(Duration::MAX));
        assert!(config.validate().is_err());
        let config = ThrottlerConfig::<String>::new().with_request_delay(Duration::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!(
            "request-throttler-config-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{ "rules": [{ "match": "example.com", "bucketSize": 5 }], "requestDelay": 20 }"#,
        )
        .unwrap();

        let config = ThrottlerConfig::<String>::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.request_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_from_missing_file() {
        let result = ThrottlerConfig::<String>::from_file("/nonexistent/throttler.json");
        assert!(matches!(result, Err(ThrottlerError::Io(_))));
    }

    #[test]
    fn test_from_env_overrides() {
        env::set_var(REQUEST_DELAY_ENV, "75ms");
        env::set_var(RETRY_INTERVAL_ENV, "-1");
        env::set_var(MAX_RETRIES_ENV, "4");

        let config = ThrottlerConfig::<String>::from_env();

        env::remove_var(REQUEST_DELAY_ENV);
        env::remove_var(RETRY_INTERVAL_ENV);
        env::remove_var(MAX_RETRIES_ENV);

        let config = config.unwrap();
        assert_eq!(config.request_delay, Duration::from_millis(75));
        assert_eq!(config.retry_interval, None);
        assert_eq!(config.max_retries, Some(4));
    }
}
