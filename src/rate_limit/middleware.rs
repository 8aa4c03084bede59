use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

use crate::decision::{Decision, DecisionEngine};
use crate::identity::IdentityExtractor;
use crate::quota::{InMemoryQuotaStore, QuotaStore};
use crate::rate_limit::{InMemoryWindowStore, WindowStore};

/// Configured limit for the caller's window.
pub const X_QUOTA_LIMIT: HeaderName = HeaderName::from_static("x-quota-limit");
/// Permits left in the caller's window after this request.
pub const X_QUOTA_REMAINING: HeaderName = HeaderName::from_static("x-quota-remaining");

/// A layer that gates requests on the decision engine.
///
/// Allowed requests reach the inner service with quota headers attached to the
/// response. Unknown or missing identities get 404, exhausted quotas 429 with
/// `Retry-After`, and storage faults 503. Nothing is forwarded unless the
/// engine returned an allow.
pub struct QuotaLayer<Q = InMemoryQuotaStore, W = InMemoryWindowStore> {
    engine: DecisionEngine<Q, W>,
    identity: Arc<IdentityExtractor>,
}

impl<Q, W> Clone for QuotaLayer<Q, W> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), identity: self.identity.clone() }
    }
}

impl<Q, W> QuotaLayer<Q, W> {
    /// Create a new quota layer with the default `user_id` cookie identity.
    pub fn new(engine: DecisionEngine<Q, W>) -> Self {
        Self { engine, identity: Arc::new(IdentityExtractor::default()) }
    }

    pub fn with_identity(mut self, identity: IdentityExtractor) -> Self {
        self.identity = Arc::new(identity);
        self
    }
}

impl<S, Q, W> Layer<S> for QuotaLayer<Q, W> {
    type Service = QuotaService<S, Q, W>;

    fn layer(&self, service: S) -> Self::Service {
        QuotaService { inner: service, engine: self.engine.clone(), identity: self.identity.clone() }
    }
}

/// Middleware service that enforces per-user quotas.
pub struct QuotaService<S, Q = InMemoryQuotaStore, W = InMemoryWindowStore> {
    inner: S,
    engine: DecisionEngine<Q, W>,
    identity: Arc<IdentityExtractor>,
}

impl<S: Clone, Q, W> Clone for QuotaService<S, Q, W> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), engine: self.engine.clone(), identity: self.identity.clone() }
    }
}

impl<S, Q, W, B> Service<Request<B>> for QuotaService<S, Q, W>
where
    S: Service<Request<B>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
    B: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let engine = self.engine.clone();
        // Take the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let identity = self.identity.extract(req.headers());

        Box::pin(async move {
            let Some(user) = identity else {
                debug!(target: "quotagate::gate", "request without identity rejected");
                return Ok(json_error(StatusCode::NOT_FOUND, "unknown_user", "no user identity on request"));
            };

            let decision = engine.decide(user.as_str()).await;
            match decision {
                Ok(Decision::Allow { limit, remaining, .. }) => {
                    req.extensions_mut().insert(user);
                    let mut response = inner.call(req).await?;
                    quota_headers(response.headers_mut(), limit, remaining);
                    Ok(response)
                }
                Ok(Decision::RejectQuota { limit, retry_after, .. }) => {
                    let mut response =
                        json_error(StatusCode::TOO_MANY_REQUESTS, "quota_exceeded", "request quota exhausted");
                    let headers = response.headers_mut();
                    quota_headers(headers, limit, 0);
                    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
                    Ok(response)
                }
                Ok(Decision::RejectUnknownUser) => {
                    Ok(json_error(StatusCode::NOT_FOUND, "unknown_user", "no quota configured for user"))
                }
                Err(err) => Ok(json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", &err.to_string())),
            }
        })
    }
}

fn quota_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(X_QUOTA_LIMIT, HeaderValue::from(limit));
    headers.insert(X_QUOTA_REMAINING, HeaderValue::from(remaining));
}

/// Whole seconds, rounded up, never zero.
pub(crate) fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// JSON error body shared by the gate and the management routes.
pub(crate) fn json_error(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": error, "message": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::quota::LimitPer;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceExt};

    fn engine() -> DecisionEngine {
        let engine = DecisionEngine::in_memory().with_clock(ManualClock::starting_at(10_000));
        engine.quotas().set("user-02", 1, LimitPer::Second).unwrap();
        engine
    }

    fn upstream() -> impl Service<
        Request<Body>,
        Response = Response<Body>,
        Error = Infallible,
        Future = impl Future<Output = Result<Response<Body>, Infallible>> + Send + 'static,
    > + Clone
           + Send
           + 'static {
        service_fn(|_req: Request<Body>| async { Ok::<_, Infallible>(Response::new(Body::from("ok"))) })
    }

    fn request(cookie: Option<&'static str>) -> Request<Body> {
        let mut builder = Request::post("/images");
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn allows_then_throttles() {
        let svc = QuotaLayer::new(engine()).layer(upstream());

        let ok = svc.clone().oneshot(request(Some("user_id=user-02"))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[X_QUOTA_LIMIT], "1");
        assert_eq!(ok.headers()[X_QUOTA_REMAINING], "0");

        let limited = svc.oneshot(request(Some("user_id=user-02"))).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()[RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn unknown_and_anonymous_callers_get_404() {
        let svc = QuotaLayer::new(engine()).layer(upstream());
        let unknown = svc.clone().oneshot(request(Some("user_id=attacker"))).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        let anonymous = svc.oneshot(request(None)).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn allowed_request_carries_identity_extension() {
        let inner = service_fn(|req: Request<Body>| async move {
            let id = req.extensions().get::<crate::identity::UserId>().cloned();
            Ok::<_, Infallible>(Response::new(Body::from(id.map(|u| u.0).unwrap_or_default())))
        });
        let svc = QuotaLayer::new(engine()).layer(inner);
        let resp = svc.oneshot(request(Some("user_id=user-02"))).await.unwrap();
        let body = http_body_util::BodyExt::collect(resp.into_body()).await.unwrap().to_bytes();
        assert_eq!(&body[..], b"user-02");
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_000)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_001)), 2);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
