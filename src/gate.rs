//! Admission control for outgoing requests.
//!
//! A request that finds a token in its bucket is admitted on the spot. One
//! that does not is wrapped in a [`PendingRequest`], a future that re-checks
//! the bucket every `request_delay` and yields the request back once a token
//! has been taken for it. Pending requests poll independently of each other,
//! so they are not released in submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::config_validator::{ConfigValidator, MAX_DURATION};
use crate::error::ThrottlerResult;
use crate::metrics::{MetricsCollector, UNMATCHED};
use crate::rule_set::RuleSet;
use crate::token_bucket::TokenBucket;
use crate::transport::Target;

pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(50);

/// Outcome of [`RequestGate::admit`].
#[derive(Debug)]
pub enum Admission<R> {
    /// The request may be sent now.
    Immediate(R),
    /// The request must wait for a token.
    Deferred(PendingRequest<R>),
}

impl<R> Admission<R> {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Admission::Immediate(_))
    }

    /// Wait, if needed, until the request may be sent.
    pub async fn granted(self) -> R {
        match self {
            Admission::Immediate(request) => request,
            Admission::Deferred(pending) => pending.await,
        }
    }
}

/// A request waiting for a token.
///
/// Resolves to the original request once a token has been withdrawn on its
/// behalf. The poll timer lives inside the future: it stops on success, or
/// when the future is dropped.
pub struct PendingRequest<R> {
    request: Option<R>,
    bucket: Arc<TokenBucket>,
    rule: String,
    request_delay: Duration,
    queued_at: Instant,
    ticker: Option<Interval>,
    polls: u32,
}

// No field is ever pinned; `R` is only moved out by value.
impl<R> Unpin for PendingRequest<R> {}

impl<R> PendingRequest<R> {
    fn new(request: R, bucket: Arc<TokenBucket>, rule: String, request_delay: Duration) -> Self {
        Self {
            request: Some(request),
            bucket,
            rule,
            request_delay,
            queued_at: Instant::now(),
            ticker: None,
            polls: 0,
        }
    }

    /// Label of the rule whose bucket this request waits on.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    /// Number of withdrawal attempts made so far, excluding the initial one.
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl<R> Future for PendingRequest<R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<R> {
        let this = self.get_mut();
        let (queued_at, request_delay) = (this.queued_at, this.request_delay);
        let ticker = this.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval_at(queued_at + request_delay, request_delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            ready!(ticker.poll_tick(cx));
            this.polls += 1;

            if this.bucket.try_withdraw(1.0) {
                debug!(
                    rule = %this.rule,
                    polls = this.polls,
                    waited_ms = this.queued_at.elapsed().as_millis() as u64,
                    "Token acquired for pending request"
                );
                let request = this
                    .request
                    .take()
                    .expect("PendingRequest polled after completion");
                return Poll::Ready(request);
            }
        }
    }
}

impl<R> std::fmt::Debug for PendingRequest<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("rule", &self.rule)
            .field("request_delay", &self.request_delay)
            .field("polls", &self.polls)
            .field("completed", &self.request.is_none())
            .finish()
    }
}

/// Gates outgoing requests through their rule's token bucket.
pub struct RequestGate<R> {
    rules: Arc<RuleSet<R>>,
    request_delay: Duration,
    metrics: MetricsCollector,
}

impl<R> Clone for RequestGate<R> {
    fn clone(&self) -> Self {
        Self {
            rules: Arc::clone(&self.rules),
            request_delay: self.request_delay,
            metrics: self.metrics.clone(),
        }
    }
}

impl<R> RequestGate<R> {
    /// Fails if `request_delay` is zero or longer than [`MAX_DURATION`].
    pub fn new(
        rules: Arc<RuleSet<R>>,
        request_delay: Duration,
        metrics: MetricsCollector,
    ) -> ThrottlerResult<Self> {
        ConfigValidator::validate_request_delay(request_delay)?;
        Ok(Self {
            rules,
            request_delay,
            metrics,
        })
    }

    pub fn rules(&self) -> &RuleSet<R> {
        &self.rules
    }

    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }
}

impl<R: Target> RequestGate<R> {
    /// Decide whether `request` may be sent now or has to wait for a token.
    pub fn admit(&self, request: R) -> Admission<R> {
        let Some(rule) = self.rules.resolve(&request) else {
            self.metrics.record_admission(UNMATCHED, true);
            return Admission::Immediate(request);
        };

        if rule.bucket().try_withdraw(1.0) {
            self.metrics.record_admission(rule.label(), true);
            return Admission::Immediate(request);
        }

        debug!(
            rule = %rule.label(),
            url = %request.target(),
            delay_ms = self.request_delay.as_millis() as u64,
            "Bucket empty, deferring request"
        );
        self.metrics.record_admission(rule.label(), false);

        Admission::Deferred(PendingRequest::new(
            request,
            Arc::clone(rule.bucket()),
            rule.label().to_string(),
            self.request_delay,
        ))
    }
}

impl<R> std::fmt::Debug for RequestGate<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("rules", &self.rules)
            .field("request_delay", &self.request_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::rate_limit_config::RateLimitRule;
    use tokio::time::advance;
    use tokio_test::{assert_pending, assert_ready, task};

    fn gate(rules: Vec<RateLimitRule<String>>) -> RequestGate<String> {
        let rules = RuleSet::from_rules(rules).unwrap();
        RequestGate::new(Arc::new(rules), DEFAULT_REQUEST_DELAY, MetricsCollector::new()).unwrap()
    }

    fn api_rule(size: f64, tokens: f64, interval: Duration) -> RateLimitRule<String> {
        RateLimitRule::matching(Matcher::substring("api.example.com"))
            .with_name("api")
            .with_bucket_size(size)
            .with_refill(tokens, interval)
    }

    #[test]
    fn test_new_rejects_unusable_request_delay() {
        let rules: Arc<RuleSet<String>> = Arc::new(RuleSet::new());
        for delay in [Duration::ZERO, MAX_DURATION * 2] {
            let result = RequestGate::new(Arc::clone(&rules), delay, MetricsCollector::new());
            assert!(matches!(
                result,
                Err(crate::error::ThrottlerError::ConfigurationError(_))
            ));
        }
        assert!(RequestGate::new(rules, Duration::from_millis(1), MetricsCollector::new()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_request_passes_through() {
        let gate = gate(vec![api_rule(1.0, 1.0, Duration::from_secs(60))]);
        for _ in 0..10 {
            assert!(gate.admit("https://cdn.example.com/a.png".to_string()).is_immediate());
        }
        let unmatched = gate.metrics.get_rule_metrics(UNMATCHED).unwrap();
        assert_eq!(unmatched.immediate_admissions, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_until_bucket_empty() {
        let gate = gate(vec![api_rule(2.0, 2.0, Duration::from_millis(100))]);
        assert!(gate.admit("https://api.example.com/1".to_string()).is_immediate());
        assert!(gate.admit("https://api.example.com/2".to_string()).is_immediate());
        assert!(!gate.admit("https://api.example.com/3".to_string()).is_immediate());

        let api = gate.metrics.get_rule_metrics("api").unwrap();
        assert_eq!(api.immediate_admissions, 2);
        assert_eq!(api.deferred_admissions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_request_resolves_after_refill() {
        let gate = gate(vec![api_rule(2.0, 2.0, Duration::from_millis(100))]);
        gate.admit("https://api.example.com/1".to_string());
        gate.admit("https://api.example.com/2".to_string());

        let pending = match gate.admit("https://api.example.com/3".to_string()) {
            Admission::Deferred(pending) => pending,
            Admission::Immediate(_) => panic!("bucket should be empty"),
        };
        assert_eq!(pending.rule(), "api");

        let mut pending = task::spawn(pending);
        assert_pending!(pending.poll());

        advance(Duration::from_millis(100)).await;
        let request = assert_ready!(pending.poll());
        assert_eq!(request, "https://api.example.com/3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_keeps_polling() {
        // 50ms polls credit an eighth of a token each.
        let gate = gate(vec![api_rule(1.0, 1.0, Duration::from_millis(400))]);
        gate.admit("https://api.example.com/1".to_string());

        let start = Instant::now();
        let request = gate
            .admit("https://api.example.com/2".to_string())
            .granted()
            .await;

        assert_eq!(request, "https://api.example.com/2");
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400), "waited {waited:?}");
        assert!(waited < Duration::from_millis(450), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_pending_request_takes_no_token() {
        let gate = gate(vec![api_rule(1.0, 1.0, Duration::from_millis(100))]);
        gate.admit("https://api.example.com/1".to_string());

        let pending = gate.admit("https://api.example.com/2".to_string());
        drop(pending);

        advance(Duration::from_millis(100)).await;
        assert!(gate.admit("https://api.example.com/3".to_string()).is_immediate());
    }
}
