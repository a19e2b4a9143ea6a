use std::sync::Arc;
use tower::{Service, ServiceExt};
use tracing::{info, warn};

use crate::config::ThrottlerConfig;
use crate::config_validator::ConfigValidator;
use crate::error::ThrottlerResult;
use crate::gate::{Admission, RequestGate};
use crate::metrics::{MetricsCollector, UNMATCHED};
use crate::middleware::ThrottleLayer;
use crate::retry::{RetryPolicy, Verdict};
use crate::rule_set::RuleSet;
use crate::transport::{ResponseStatus, Target};

/// Main throttler engine: admission through rule buckets, then retry on overload.
///
/// Cloning is cheap and clones share buckets and metrics.
pub struct Throttler<R> {
    gate: RequestGate<R>,
    retry: RetryPolicy,
    metrics: MetricsCollector,
}

impl<R> Clone for Throttler<R> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            retry: self.retry,
            metrics: self.metrics.clone(),
        }
    }
}

impl<R> std::fmt::Debug for Throttler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("gate", &self.gate)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<R> Throttler<R> {
    /// Build a throttler, validating every rule up front.
    pub fn new(config: ThrottlerConfig<R>) -> ThrottlerResult<Self> {
        ConfigValidator::validate_retry_interval(config.retry_interval)?;
        let retry = config.retry_policy();
        let rules = RuleSet::from_rules(config.rules)?;

        info!(
            rules = rules.len(),
            request_delay_ms = config.request_delay.as_millis() as u64,
            retry_interval = ?retry.interval(),
            max_retries = ?retry.max_retries(),
            "Throttler initialized"
        );

        let metrics = MetricsCollector::new();
        let gate = RequestGate::new(Arc::new(rules), config.request_delay, metrics.clone())?;

        Ok(Self {
            gate,
            retry,
            metrics,
        })
    }

    pub fn gate(&self) -> &RequestGate<R> {
        &self.gate
    }

    pub fn rules(&self) -> &RuleSet<R> {
        self.gate.rules()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Tower layer that runs every request of the wrapped service through this throttler.
    pub fn layer(&self) -> ThrottleLayer<R> {
        ThrottleLayer::new(self.clone())
    }
}

impl<R: Target> Throttler<R> {
    /// Request hook: decide whether `request` may be sent now.
    pub fn admit(&self, request: R) -> Admission<R> {
        self.gate.admit(request)
    }

    /// Response hook: inspect the outcome of the `attempt`-th dispatch of `request`.
    pub fn on_response<T, E>(&self, request: R, attempt: u32, outcome: Result<T, E>) -> Verdict<R, T, E>
    where
        T: ResponseStatus,
        E: ResponseStatus,
    {
        let verdict = self.retry.on_response(request, attempt, outcome);

        if let Verdict::Resubmit(state) = &verdict {
            let rule = self
                .rules()
                .resolve(state.request())
                .map(|rule| rule.label())
                .unwrap_or(UNMATCHED);
            warn!(
                rule = %rule,
                url = %state.request().target(),
                attempt,
                retry_interval = ?self.retry.interval(),
                "Too many requests, retrying request"
            );
            self.metrics.record_retry(rule);
        }

        verdict
    }

    /// Send `request` through `service`, waiting for a token first and
    /// resubmitting it for as long as the remote answers 429.
    ///
    /// Every resubmission goes through admission again.
    pub async fn execute<S>(&self, service: &mut S, request: R) -> Result<S::Response, S::Error>
    where
        R: Clone,
        S: Service<R>,
        S::Response: ResponseStatus,
        S::Error: ResponseStatus,
    {
        let mut request = request;
        let mut attempt = 0;

        loop {
            let admitted = self.gate.admit(request).granted().await;
            attempt += 1;

            let retained = self.retry.is_enabled().then(|| admitted.clone());
            let outcome = match service.ready().await {
                Ok(service) => service.call(admitted).await,
                Err(error) => Err(error),
            };

            let Some(retained) = retained else {
                return outcome;
            };

            match self.on_response(retained, attempt, outcome) {
                Verdict::Settled(outcome) => return outcome,
                Verdict::Resubmit(state) => request = state.elapsed().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottlerError;
    use crate::matcher::Matcher;
    use crate::rate_limit_config::RateLimitRule;
    use http::StatusCode;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn config() -> ThrottlerConfig<String> {
        ThrottlerConfig::new().with_rule(
            RateLimitRule::matching(Matcher::substring("api.example.com"))
                .with_name("api")
                .with_bucket_size(2.0)
                .with_refill(2.0, Duration::from_millis(100)),
        )
    }

    /// Endpoint answering 429 to the first `overloaded` calls, then 200.
    fn endpoint(
        overloaded: usize,
        calls: Arc<AtomicUsize>,
    ) -> impl Service<String, Response = StatusCode, Error = Infallible> + Clone {
        tower::service_fn(move |_request: String| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < overloaded {
                    Ok::<_, Infallible>(StatusCode::TOO_MANY_REQUESTS)
                } else {
                    Ok(StatusCode::OK)
                }
            }
        })
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let conflicting = config().with_rule(RateLimitRule::catch_all());
        assert!(matches!(
            Throttler::new(conflicting),
            Err(ThrottlerError::CatchAllConflict { index: 1 })
        ));

        let zero_delay = config().with_request_delay(Duration::ZERO);
        assert!(Throttler::new(zero_delay).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_passes_through() {
        let throttler = Throttler::new(config()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service = endpoint(0, calls.clone());

        let status = throttler
            .execute(&mut service, "https://api.example.com/users".to_string())
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_overload() {
        let throttler = Throttler::new(config()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service = endpoint(1, calls.clone());

        let start = Instant::now();
        let status = throttler
            .execute(&mut service, "https://api.example.com/users".to_string())
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(50));

        let api = throttler.metrics().get_rule_metrics("api").unwrap();
        assert_eq!(api.retried_responses, 1);
        assert_eq!(api.total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_without_retry_surfaces_overload() {
        let throttler = Throttler::new(config().without_retry()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service = endpoint(1, calls.clone());

        let status = throttler
            .execute(&mut service, "https://api.example.com/users".to_string())
            .await
            .unwrap();

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_honours_max_retries() {
        let throttler = Throttler::new(config().with_max_retries(2)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service = endpoint(usize::MAX, calls.clone());

        let status = throttler
            .execute(&mut service, "https://cdn.example.com/a.png".to_string())
            .await
            .unwrap();

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let unmatched = throttler.metrics().get_rule_metrics(UNMATCHED).unwrap();
        assert_eq!(unmatched.retried_responses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_response_settles_other_statuses() {
        let throttler = Throttler::new(config()).unwrap();
        let outcome: Result<StatusCode, StatusCode> = Err(StatusCode::BAD_GATEWAY);
        match throttler.on_response("https://api.example.com".to_string(), 1, outcome) {
            Verdict::Settled(outcome) => assert_eq!(outcome, Err(StatusCode::BAD_GATEWAY)),
            Verdict::Resubmit(_) => panic!("only 429 is retried"),
        }
        assert!(throttler.metrics().get_rule_metrics("api").is_none());
    }
}
