use std::time::Duration;

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::matcher::Matcher;
use crate::token_bucket::TokenBucket;

pub const DEFAULT_BUCKET_SIZE: f64 = 20.0;
pub const DEFAULT_TOKENS_PER_INTERVAL: f64 = 20.0;
pub const DEFAULT_TOKEN_INTERVAL: Duration = Duration::from_millis(1000);

/// Size of a rule's bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketSize {
    Tokens(f64),
    Unlimited,
}

impl Default for BucketSize {
    fn default() -> Self {
        BucketSize::Tokens(DEFAULT_BUCKET_SIZE)
    }
}

/// A single rate limiting rule: which requests it covers and how fast they may go.
pub struct RateLimitRule<R> {
    pub name: Option<String>,
    pub matcher: Matcher<R>,
    pub bucket_size: BucketSize,
    pub tokens_per_interval: f64,
    pub token_interval: Duration,
}

impl<R> Default for RateLimitRule<R> {
    fn default() -> Self {
        Self {
            name: None,
            matcher: Matcher::Always,
            bucket_size: BucketSize::default(),
            tokens_per_interval: DEFAULT_TOKENS_PER_INTERVAL,
            token_interval: DEFAULT_TOKEN_INTERVAL,
        }
    }
}

impl<R> Clone for RateLimitRule<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            matcher: self.matcher.clone(),
            bucket_size: self.bucket_size,
            tokens_per_interval: self.tokens_per_interval,
            token_interval: self.token_interval,
        }
    }
}

impl<R> std::fmt::Debug for RateLimitRule<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitRule")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("bucket_size", &self.bucket_size)
            .field("tokens_per_interval", &self.tokens_per_interval)
            .field("token_interval", &self.token_interval)
            .finish()
    }
}

impl<R> RateLimitRule<R> {
    pub fn new(
        matcher: Matcher<R>,
        bucket_size: BucketSize,
        tokens_per_interval: f64,
        token_interval: Duration,
    ) -> Self {
        Self {
            name: None,
            matcher,
            bucket_size,
            tokens_per_interval,
            token_interval,
        }
    }

    /// Create a rule for requests accepted by `matcher`, with default limits.
    pub fn matching(matcher: Matcher<R>) -> Self {
        Self {
            matcher,
            ..Self::default()
        }
    }

    /// Create a rule whose bucket never runs out.
    pub fn unlimited(matcher: Matcher<R>) -> Self {
        Self {
            matcher,
            bucket_size: BucketSize::Unlimited,
            ..Self::default()
        }
    }

    /// Create a rule that covers every request.
    pub fn catch_all() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: f64) -> Self {
        self.bucket_size = BucketSize::Tokens(bucket_size);
        self
    }

    /// Credit `tokens` every `interval`.
    pub fn with_refill(mut self, tokens: f64, interval: Duration) -> Self {
        self.tokens_per_interval = tokens;
        self.token_interval = interval;
        self
    }

    /// Validate rule parameters. `index` is the rule's position, used in errors.
    pub fn validate(&self, index: usize) -> ThrottlerResult<()> {
        if let BucketSize::Tokens(size) = self.bucket_size {
            if !size.is_finite() || size <= 0.0 {
                return Err(ThrottlerError::invalid_rule(
                    index,
                    format!("bucket size must be a positive number, got {}", size),
                ));
            }
        }
        if !self.tokens_per_interval.is_finite() || self.tokens_per_interval < 0.0 {
            return Err(ThrottlerError::invalid_rule(
                index,
                format!(
                    "tokens per interval must be a non-negative number, got {}",
                    self.tokens_per_interval
                ),
            ));
        }
        if self.token_interval.is_zero() {
            return Err(ThrottlerError::invalid_rule(
                index,
                "token interval must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Build the full bucket this rule starts with.
    pub fn build_bucket(&self) -> TokenBucket {
        match self.bucket_size {
            BucketSize::Unlimited => TokenBucket::unlimited(),
            BucketSize::Tokens(size) => {
                TokenBucket::new(size, self.tokens_per_interval, self.token_interval)
            }
        }
    }

    /// Label used in logs and metrics.
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("rule-{}", index))
    }
}
