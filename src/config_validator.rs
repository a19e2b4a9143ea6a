use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;

use crate::config::ThrottlerConfig;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::matcher::Matcher;
use crate::rate_limit_config::{BucketSize, RateLimitRule};

const UNLIMITED: &str = "unlimited";

/// Longest duration accepted anywhere in a configuration.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Validates configuration documents and turns them into typed values.
///
/// Keys are accepted in camelCase (`bucketSize`) or snake_case (`bucket_size`).
/// Durations are either a number of milliseconds or a human readable string
/// such as `"250ms"` or `"1s"`.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Parses a whole configuration document.
    pub fn parse_config<R>(doc: &Value) -> ThrottlerResult<ThrottlerConfig<R>> {
        let obj = doc.as_object().ok_or_else(|| {
            ThrottlerError::ConfigurationError(
                "Configuration must be a JSON object".to_string(),
            )
        })?;

        let mut config = ThrottlerConfig::default();

        if let Some(rules) = field(obj, "rules", "rules") {
            let rules = rules.as_array().ok_or_else(|| {
                ThrottlerError::ConfigurationError("Missing or invalid 'rules' field".to_string())
            })?;
            config.rules = rules
                .iter()
                .enumerate()
                .map(|(index, rule)| Self::parse_rule(index, rule))
                .collect::<ThrottlerResult<_>>()?;
        }

        if let Some(delay) = field(obj, "requestDelay", "request_delay") {
            config.request_delay = Self::parse_duration("requestDelay", delay)?;
        }

        if let Some(interval) = field(obj, "retryInterval", "retry_interval") {
            config.retry_interval = Self::parse_retry_interval(interval)?;
        }

        if let Some(max) = field(obj, "maxRetries", "max_retries") {
            config.max_retries = match max {
                Value::Null => None,
                other => Some(
                    other
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| {
                            ThrottlerError::ConfigurationError(
                                "Missing or invalid 'maxRetries' field".to_string(),
                            )
                        })?,
                ),
            };
        }

        Ok(config)
    }

    /// Parses the rule at position `index`.
    pub fn parse_rule<R>(index: usize, value: &Value) -> ThrottlerResult<RateLimitRule<R>> {
        let obj = value
            .as_object()
            .ok_or_else(|| ThrottlerError::invalid_rule(index, "rule must be a JSON object"))?;

        let mut rule = RateLimitRule::matching(Self::parse_matcher(index, obj.get("match"))?);

        if let Some(name) = obj.get("name") {
            let name = name
                .as_str()
                .ok_or_else(|| ThrottlerError::invalid_rule(index, "Missing or invalid 'name' field"))?;
            rule = rule.with_name(name);
        }

        if let Some(size) = field(obj, "bucketSize", "bucket_size") {
            rule.bucket_size = match size {
                Value::String(s) if s.eq_ignore_ascii_case(UNLIMITED) => BucketSize::Unlimited,
                Value::Number(n) => BucketSize::Tokens(n.as_f64().unwrap_or(f64::NAN)),
                _ => {
                    return Err(ThrottlerError::invalid_rule(
                        index,
                        "Missing or invalid 'bucketSize' field",
                    ))
                }
            };
        }

        if let Some(tokens) = field(obj, "tokensPerInterval", "tokens_per_interval") {
            rule.tokens_per_interval = tokens.as_f64().ok_or_else(|| {
                ThrottlerError::invalid_rule(index, "Missing or invalid 'tokensPerInterval' field")
            })?;
        }

        if let Some(interval) = field(obj, "tokenInterval", "token_interval") {
            rule.token_interval = Self::parse_duration("tokenInterval", interval)
                .map_err(|e| ThrottlerError::invalid_rule(index, e.to_string()))?;
        }

        rule.validate(index)?;
        Ok(rule)
    }

    fn parse_matcher<R>(index: usize, value: Option<&Value>) -> ThrottlerResult<Matcher<R>> {
        match value {
            None | Some(Value::Null) => Ok(Matcher::Always),
            Some(Value::String(needle)) => Ok(Matcher::substring(needle.as_str())),
            Some(Value::Object(obj)) => {
                if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
                    Matcher::pattern(pattern)
                } else if let Some(needle) = obj.get("substring").and_then(Value::as_str) {
                    Ok(Matcher::substring(needle))
                } else {
                    Err(ThrottlerError::invalid_rule(
                        index,
                        "'match' object needs a 'pattern' or 'substring' string",
                    ))
                }
            }
            Some(_) => Err(ThrottlerError::invalid_rule(
                index,
                "Missing or invalid 'match' field",
            )),
        }
    }

    /// Parses a non-negative duration given in milliseconds or as a human readable string.
    pub fn parse_duration(name: &str, value: &Value) -> ThrottlerResult<Duration> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .and_then(millis)
                .ok_or_else(|| invalid_duration(name, &n.to_string())),
            Value::String(s) => Self::parse_duration_str(name, s),
            _ => Err(ThrottlerError::ConfigurationError(format!(
                "Missing or invalid '{}' field",
                name
            ))),
        }
    }

    /// String form of [`ConfigValidator::parse_duration`], used for environment overrides.
    pub fn parse_duration_str(name: &str, value: &str) -> ThrottlerResult<Duration> {
        let value = value.trim();
        let duration = match value.parse::<f64>() {
            Ok(ms) => millis(ms),
            Err(_) => humantime(value).filter(|d| *d <= MAX_DURATION),
        };
        duration.ok_or_else(|| invalid_duration(name, value))
    }

    /// Parses `retryInterval`.
    ///
    /// Negative and non-numeric values disable retry. A duration beyond
    /// [`MAX_DURATION`] is an error.
    pub fn parse_retry_interval(value: &Value) -> ThrottlerResult<Option<Duration>> {
        match value {
            Value::Number(n) => retry_interval_millis(n.as_f64().unwrap_or(f64::NAN), &n.to_string()),
            Value::String(s) => Self::parse_retry_interval_str(s),
            other => {
                warn!(value = %other, "Retry interval is not a duration, retry disabled");
                Ok(None)
            }
        }
    }

    /// String form of [`ConfigValidator::parse_retry_interval`].
    pub fn parse_retry_interval_str(value: &str) -> ThrottlerResult<Option<Duration>> {
        let value = value.trim();
        if let Ok(ms) = value.parse::<f64>() {
            return retry_interval_millis(ms, value);
        }
        match humantime(value) {
            Some(interval) => {
                Self::validate_retry_interval(Some(interval))?;
                Ok(Some(interval))
            }
            None => {
                warn!(value = %value, "Retry interval is not a duration, retry disabled");
                Ok(None)
            }
        }
    }

    /// A zero poll delay would spin, and the delay is added to the current instant.
    pub fn validate_request_delay(delay: Duration) -> ThrottlerResult<()> {
        if delay.is_zero() {
            return Err(ThrottlerError::ConfigurationError(
                "Request delay must be greater than 0".to_string(),
            ));
        }
        if delay > MAX_DURATION {
            return Err(ThrottlerError::ConfigurationError(format!(
                "Request delay must not exceed {:?}",
                MAX_DURATION
            )));
        }
        Ok(())
    }

    pub fn validate_retry_interval(interval: Option<Duration>) -> ThrottlerResult<()> {
        match interval {
            Some(interval) if interval > MAX_DURATION => {
                Err(ThrottlerError::ConfigurationError(format!(
                    "Retry interval must not exceed {:?}",
                    MAX_DURATION
                )))
            }
            _ => Ok(()),
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

fn millis(ms: f64) -> Option<Duration> {
    if !(ms >= 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(ms / 1000.0)
        .ok()
        .filter(|d| *d <= MAX_DURATION)
}

fn humantime(value: &str) -> Option<Duration> {
    serde_json::from_value::<humantime_serde::Serde<Duration>>(Value::String(value.to_string()))
        .ok()
        .map(humantime_serde::Serde::into_inner)
}

fn retry_interval_millis(ms: f64, raw: &str) -> ThrottlerResult<Option<Duration>> {
    if ms.is_nan() || ms < 0.0 {
        warn!(value = %raw, "Retry interval is negative, retry disabled");
        return Ok(None);
    }
    millis(ms)
        .map(Some)
        .ok_or_else(|| invalid_duration("retryInterval", raw))
}

fn invalid_duration(name: &str, value: &str) -> ThrottlerError {
    ThrottlerError::ConfigurationError(format!("Invalid duration '{}' for '{}'", value, name))
}
