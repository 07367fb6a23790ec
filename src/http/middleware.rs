//! Admission middleware wrapping an inner HTTP service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::warn;

use crate::http::key::{self, KeyPolicy};
use crate::ratelimit::{Decision, RateLimiter};

/// Response header carrying the caller's quota ceiling.
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Response header carrying the caller's remaining tokens.
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// `tower` layer that gates every request through a shared [`RateLimiter`].
#[derive(Clone)]
pub struct AdmissionLayer {
    limiter: Arc<RateLimiter>,
    policy: KeyPolicy,
}

impl AdmissionLayer {
    /// Create a layer sharing `limiter` across all wrapped services.
    pub fn new(limiter: Arc<RateLimiter>, policy: KeyPolicy) -> Self {
        Self { limiter, policy }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: Arc::clone(&self.limiter),
            policy: self.policy,
        }
    }
}

/// Service produced by [`AdmissionLayer`].
///
/// Admitted requests are forwarded to the inner service and the response is
/// annotated with the quota headers. Rejected requests are answered
/// immediately with `429 Too Many Requests`, a `retry-after` header, and the
/// plain status text as body; the inner service never sees them.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    policy: KeyPolicy,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), S::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let caller = match key::caller_key(req.headers(), peer) {
            Ok(caller) => caller,
            Err(err) => match self.policy {
                KeyPolicy::Pool => key::POOLED_KEY.to_string(),
                KeyPolicy::Reject => {
                    warn!(error = %err, "rejecting request from unidentifiable caller");
                    return Box::pin(async move { Ok(unidentified_response()) });
                }
            },
        };

        let decision = self.limiter.check(&caller);

        if !decision.admitted {
            return Box::pin(async move { Ok(rejected_response(&decision)) });
        }

        let future = self.inner.call(req);
        Box::pin(async move {
            let mut response = future.await?;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
            headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
            Ok(response)
        })
    }
}

fn rejected_response(decision: &Decision) -> Response {
    let status = StatusCode::TOO_MANY_REQUESTS;
    let mut response = (status, status.canonical_reason().unwrap_or_default()).into_response();
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(retry_after_secs(decision.retry_after)),
    );
    response
}

fn unidentified_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        "client address could not be determined",
    )
        .into_response()
}

/// Whole seconds, rounded up so a sub-second refill interval is never
/// reported as zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}
