//! HTTP surface: management routes plus the gated upload route.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::admin::{ConfigApi, QuotaRequest, Upsert};
use crate::error::QuotaError;
use crate::identity::{IdentityExtractor, UserId};
use crate::quota::QuotaStore;
use crate::rate_limit::middleware::json_error;
use crate::rate_limit::{QuotaLayer, WindowStore};

/// Largest upload accepted on `POST /images` unless configured otherwise.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// HTTP client used to forward admitted uploads.
type HttpClient = Client<HttpConnector, Body>;

const HOP_BY_HOP: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

impl IntoResponse for QuotaError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind) = match &self {
            QuotaError::InvalidConfig { .. } => (StatusCode::BAD_REQUEST, "invalid_config"),
            QuotaError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            QuotaError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
        };
        json_error(status, kind, &self.to_string())
    }
}

/// Forwards admitted uploads to a fixed upstream base URL.
#[derive(Clone)]
pub struct Forwarder {
    client: HttpClient,
    base: Arc<str>,
}

impl Forwarder {
    pub fn new(upstream: &str) -> Self {
        let client: HttpClient = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build_http();
        Self { client, base: Arc::from(upstream.trim_end_matches('/')) }
    }

    async fn forward(&self, req: Request<Body>) -> axum::response::Response {
        let path = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let uri: Uri = match format!("{}{}", self.base, path).parse() {
            Ok(uri) => uri,
            Err(e) => {
                error!(target: "quotagate::server", error = %e, "invalid forward URI");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response();
            }
        };
        debug!(target: "quotagate::server", %uri, "forwarding upload");

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        for name in HOP_BY_HOP {
            parts.headers.remove(name);
        }

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body)).into_response()
            }
            Err(e) => {
                error!(target: "quotagate::server", error = %e, "upstream error");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
        }
    }
}

/// Router wiring options beyond the engine itself.
#[derive(Clone)]
pub struct GatewayOptions {
    pub identity: IdentityExtractor,
    pub forwarder: Option<Forwarder>,
    /// Uploads above this size get 413 and are never forwarded.
    pub max_upload_bytes: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self { identity: IdentityExtractor::default(), forwarder: None, max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES }
    }
}

#[derive(Clone)]
struct Uploads {
    forwarder: Option<Forwarder>,
    max_bytes: usize,
}

/// Build the full router over `api`.
pub fn router<Q, W>(api: ConfigApi<Q, W>, options: GatewayOptions) -> Router
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    let gate = QuotaLayer::new(api.engine().clone()).with_identity(options.identity);

    let uploads = Router::new()
        .route("/images", post(upload))
        .with_state(Uploads { forwarder: options.forwarder, max_bytes: options.max_upload_bytes })
        .route_layer(gate);

    let management = Router::new()
        .route(
            "/ratelimit-config/users/:user_id",
            get(get_quota::<Q, W>).put(put_quota::<Q, W>).delete(delete_quota::<Q, W>),
        )
        .route("/ratelimit-status", get(status_all::<Q, W>))
        .route("/ratelimit-status/users/:user_id", get(get_quota::<Q, W>))
        .route("/ratelimit-decrement/users/:user_id", get(decrement::<Q, W>))
        .with_state(api);

    Router::new()
        .route("/health", get(health))
        .merge(management)
        .merge(uploads)
        .layer(TraceLayer::new_for_http())
}

/// Bind `listen_addr` and serve until ctrl-c.
pub async fn run(listener: TcpListener, router: Router) -> std::io::Result<()> {
    info!(target: "quotagate::server", addr = ?listener.local_addr().ok(), "listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(target: "quotagate::server", "shutdown requested");
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn put_quota<Q, W>(
    State(api): State<ConfigApi<Q, W>>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<axum::response::Response, QuotaError>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    let request: QuotaRequest = serde_json::from_slice(&body)
        .map_err(|e| QuotaError::InvalidConfig { reason: format!("malformed body: {e}") })?;
    let (body, upsert) = api.put(&user_id, &request).await?;
    let status = match upsert {
        Upsert::Created => StatusCode::CREATED,
        Upsert::Updated => StatusCode::OK,
    };
    Ok((status, Json(body)).into_response())
}

async fn get_quota<Q, W>(
    State(api): State<ConfigApi<Q, W>>,
    Path(user_id): Path<String>,
) -> Result<axum::response::Response, QuotaError>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    Ok(Json(api.get(&user_id).await?).into_response())
}

async fn delete_quota<Q, W>(
    State(api): State<ConfigApi<Q, W>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, QuotaError>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    api.delete(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status_all<Q, W>(State(api): State<ConfigApi<Q, W>>) -> Result<axum::response::Response, QuotaError>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    let all = api.status_all().await?;
    if all.is_empty() {
        return Ok(json_error(StatusCode::NOT_FOUND, "not_found", "no quotas configured"));
    }
    Ok(Json(all).into_response())
}

async fn decrement<Q, W>(
    State(api): State<ConfigApi<Q, W>>,
    Path(user_id): Path<String>,
) -> Result<axum::response::Response, QuotaError>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    let outcome = api.decrement(&user_id).await?;
    let status = if outcome.admitted { StatusCode::OK } else { StatusCode::TOO_MANY_REQUESTS };
    Ok((status, Json(outcome.body)).into_response())
}

async fn upload(State(uploads): State<Uploads>, req: Request<Body>) -> axum::response::Response {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > uploads.max_bytes as u64) {
        return too_large(uploads.max_bytes);
    }

    let (parts, body) = req.into_parts();
    let bytes = match Limited::new(body, uploads.max_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => return too_large(uploads.max_bytes),
        Err(e) => {
            debug!(target: "quotagate::server", error = %e, "failed to read upload body");
            return json_error(StatusCode::BAD_REQUEST, "bad_request", "unreadable body");
        }
    };

    match uploads.forwarder {
        Some(forwarder) => forwarder.forward(Request::from_parts(parts, Body::from(bytes))).await,
        None => {
            let user = parts.extensions.get::<UserId>().map(|u| u.0.clone()).unwrap_or_default();
            Json(serde_json::json!({ "status": "accepted", "user_id": user, "bytes": bytes.len() })).into_response()
        }
    }
}

fn too_large(max_bytes: usize) -> axum::response::Response {
    debug!(target: "quotagate::server", max_bytes, "upload over size limit rejected");
    json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", &format!("upload exceeds {max_bytes} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_map_to_statuses() {
        let bad = QuotaError::InvalidConfig { reason: "x".into() }.into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let missing = QuotaError::NotFound { user_id: "u".into() }.into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let down = QuotaError::Storage("down".into()).into_response();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn forwarder_reports_bad_gateway_when_upstream_is_down() {
        // Reserve a free port, then release it so nothing is listening there.
        let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let forwarder = Forwarder::new(&format!("http://{addr}/"));
        let req = Request::post("/images").body(Body::empty()).unwrap();
        let resp = forwarder.forward(req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
