//! Per-route rate limiting keyed by caller.
//!
//! Callers with a valid bearer token are counted as `user:<uid>`, everyone
//! else as `ip:<address>`. The verdict is left in the request extensions so
//! the auth extractor does not verify the token twice.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde_json::json;
use tower::{Layer, Service};

use super::auth::{bearer_token, TokenRejected, VerifiedUid};
use crate::services::{AuthFailure, TokenVerifier};
use crate::AppState;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Drop idle keys once a limiter tracks this many callers
const RETAIN_THRESHOLD: usize = 10_000;

/// Requests allowed per window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatePolicy {
    requests: NonZeroU32,
    window_secs: u64,
}

impl RatePolicy {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests: NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN),
            window_secs: 60,
        }
    }

    pub fn per_hour(requests: u32) -> Self {
        Self {
            requests: NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN),
            window_secs: 3600,
        }
    }

    /// Seconds a limited caller is told to wait
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    fn quota(&self) -> Quota {
        match self.window_secs {
            60 => Quota::per_minute(self.requests),
            _ => Quota::per_hour(self.requests),
        }
    }
}

struct Limits {
    policy: RatePolicy,
    limiter: KeyedLimiter,
    verifier: Arc<dyn TokenVerifier>,
}

/// Rate limiting layer for a single route
#[derive(Clone)]
pub struct RateLimitLayer {
    limits: Option<Arc<Limits>>,
}

impl RateLimitLayer {
    /// A fresh limiter; a pass-through when rate limiting is switched off
    pub fn new(policy: RatePolicy, state: &AppState) -> Self {
        let limits = state.config.rate_limit_enabled.then(|| {
            Arc::new(Limits {
                policy,
                limiter: RateLimiter::keyed(policy.quota()),
                verifier: state.verifier.clone(),
            })
        });
        Self { limits }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limits: self.limits.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limits: Option<Arc<Limits>>,
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let limits = self.limits.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(limits) = limits else {
                return inner.call(req).await;
            };

            let key = match bearer_token(req.headers()) {
                Some(token) => match limits.verifier.verify(&token).await {
                    Ok(uid) => {
                        req.extensions_mut().insert(VerifiedUid(uid.clone()));
                        format!("user:{}", uid)
                    }
                    // Invalid tokens are counted by address
                    Err(AuthFailure::Rejected(reason)) => {
                        req.extensions_mut().insert(TokenRejected(reason));
                        format!("ip:{}", client_ip(&req))
                    }
                    Err(AuthFailure::Unavailable(_)) => format!("ip:{}", client_ip(&req)),
                },
                None => format!("ip:{}", client_ip(&req)),
            };

            if limits.limiter.len() > RETAIN_THRESHOLD {
                limits.limiter.retain_recent();
            }

            if limits.limiter.check_key(&key).is_err() {
                tracing::warn!("Rate limit exceeded for {} on {}", key, req.uri().path());
                return Ok(too_many_requests(limits.policy.window_secs()));
            }

            inner.call(req).await
        })
    }
}

/// First `X-Forwarded-For` hop, else the peer address
fn client_ip(req: &Request<Body>) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn too_many_requests(retry_after: u64) -> Response<Body> {
    let body = Json(json!({
        "error": "Rate limit exceeded",
        "message": format!("Too many requests. Please try again in {} seconds.", retry_after),
        "retry_after": retry_after,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
