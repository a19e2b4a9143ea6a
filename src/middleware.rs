use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::throttler::Throttler;
use crate::transport::{ResponseStatus, Target};

/// Layer that throttles every request sent through the wrapped service.
pub struct ThrottleLayer<R> {
    throttler: Throttler<R>,
}

impl<R> ThrottleLayer<R> {
    pub fn new(throttler: Throttler<R>) -> Self {
        Self { throttler }
    }
}

impl<R> Clone for ThrottleLayer<R> {
    fn clone(&self) -> Self {
        Self::new(self.throttler.clone())
    }
}

impl<R> std::fmt::Debug for ThrottleLayer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleLayer")
            .field("throttler", &self.throttler)
            .finish()
    }
}

impl<S, R> Layer<S> for ThrottleLayer<R> {
    type Service = ThrottleService<S, R>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            throttler: self.throttler.clone(),
        }
    }
}

/// Service produced by [`ThrottleLayer`].
pub struct ThrottleService<S, R> {
    inner: S,
    throttler: Throttler<R>,
}

impl<S: Clone, R> Clone for ThrottleService<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            throttler: self.throttler.clone(),
        }
    }
}

impl<S: std::fmt::Debug, R> std::fmt::Debug for ThrottleService<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleService")
            .field("inner", &self.inner)
            .field("throttler", &self.throttler)
            .finish()
    }
}

impl<S, R> Service<R> for ThrottleService<S, R>
where
    R: Target + Clone + Send + 'static,
    S: Service<R> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: ResponseStatus + Send + 'static,
    S::Error: ResponseStatus + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    /// Always ready. The inner service is driven to readiness inside the
    /// response future, once a token has been granted, so no inner capacity
    /// is held while a request waits on its bucket.
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: R) -> Self::Future {
        let mut inner = self.inner.clone();
        let throttler = self.throttler.clone();

        Box::pin(async move { throttler.execute(&mut inner, request).await })
    }
}
