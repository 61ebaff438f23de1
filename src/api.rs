//! HTTP API: bypass endpoint, visitor tracking, health and static front-end.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::engine::{ResolutionError, Resolver};
use crate::notifications::Notifier;
use crate::sites;
use crate::visitors::{client_ip, GeoLocator, Visitor, VisitorLog};

#[derive(OpenApi)]
#[openapi(
    paths(bypass, log_visit, list_sites, health),
    components(schemas(
        BypassRequest,
        BypassResponse,
        ErrorResponse,
        VisitResponse,
        SiteInfo,
        HealthResponse
    )),
    tags(
        (name = "bypass", description = "Gate link resolution"),
        (name = "service", description = "Service housekeeping")
    )
)]
pub struct ApiDoc;

pub struct AppState {
    pub resolver: Arc<Resolver>,
    /// One permit per concurrently open rendering session
    pub sessions: Semaphore,
    pub visitors: VisitorLog,
    pub geo: GeoLocator,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(resolver: Resolver, max_sessions: usize, geo: GeoLocator, notifier: Notifier) -> Self {
        Self {
            resolver: Arc::new(resolver),
            sessions: Semaphore::new(max_sessions.max(1)),
            visitors: VisitorLog::new(),
            geo,
            notifier,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BypassRequest {
    /// Registry id, e.g. `shr2link`
    #[schema(example = "shr2link")]
    pub site: Option<String>,
    /// Short link path, with or without scheme and host
    #[schema(example = "89BVVVXW")]
    pub url_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BypassResponse {
    pub success: bool,
    pub download_url: String,
    pub original_url: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisitResponse {
    pub success: bool,
    pub message: String,
    pub is_new: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    pub id: String,
    pub short_host: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Failure of a bypass request, mapped onto status codes.
#[derive(Debug)]
pub enum ApiError {
    MissingParameters,
    Resolution(ResolutionError),
    Unavailable,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameters => StatusCode::BAD_REQUEST,
            ApiError::Resolution(ResolutionError::UnsupportedSite(_)) => StatusCode::BAD_REQUEST,
            ApiError::Resolution(ResolutionError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Resolution(ResolutionError::SessionFailure(_)) | ApiError::Unavailable => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ApiError::MissingParameters => "Required parameters are missing",
            ApiError::Resolution(ResolutionError::UnsupportedSite(_)) => {
                "This website is not currently supported"
            }
            ApiError::Resolution(ResolutionError::NotFound) => {
                "Download link not found - please try again"
            }
            ApiError::Resolution(ResolutionError::SessionFailure(_)) | ApiError::Unavailable => {
                "Service temporarily unavailable"
            }
        }
    }
}

impl From<ResolutionError> for ApiError {
    fn from(err: ResolutionError) -> Self {
        ApiError::Resolution(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: self.message().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/bypass", post(bypass))
        .route("/api/visit", post(log_visit))
        .route("/api/sites", get(list_sites))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolve a gated short link
#[utoipa::path(
    post,
    path = "/api/bypass",
    request_body = BypassRequest,
    responses(
        (status = 200, description = "Link resolved", body = BypassResponse),
        (status = 400, description = "Missing parameters or unsupported site", body = ErrorResponse),
        (status = 404, description = "No download link on the gate page", body = ErrorResponse),
        (status = 500, description = "Rendering session failed", body = ErrorResponse)
    ),
    tag = "bypass"
)]
pub async fn bypass(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BypassRequest>, JsonRejection>,
) -> Result<Json<BypassResponse>, ApiError> {
    let Json(req) = body.map_err(|rejection| {
        debug!(status = %rejection.status(), error = %rejection.body_text(), "unreadable bypass body");
        ApiError::MissingParameters
    })?;
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(site), Some(url_path)) = (non_blank(req.site), non_blank(req.url_path)) else {
        return Err(ApiError::MissingParameters);
    };

    let _permit = state.sessions.acquire().await.map_err(|e| {
        error!(error = %e, "session pool closed");
        ApiError::Unavailable
    })?;

    info!(site = %site, url_path = %url_path, "🚀 Bypass requested");
    let link = state.resolver.resolve(&site, &url_path).await?;

    Ok(Json(BypassResponse {
        success: true,
        download_url: link.url,
        original_url: link.gate_url,
        message: "Link bypassed successfully!".to_string(),
    }))
}

/// Record a landing page visit
#[utoipa::path(
    post,
    path = "/api/visit",
    responses((status = 200, description = "Visit recorded", body = VisitResponse)),
    tag = "service"
)]
pub async fn log_visit(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<VisitResponse> {
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown User Agent")
        .to_string();

    let is_new = state.visitors.is_new(&ip, &user_agent);
    if is_new && state.notifier.is_enabled() {
        let geo = state.geo.clone();
        let notifier = state.notifier.clone();
        tokio::spawn(async move {
            let location = geo.locate(&ip).await;
            let visitor = Visitor::new(ip, user_agent, location);
            notifier.send(&visitor.to_message()).await;
        });
    }

    Json(VisitResponse {
        success: true,
        message: "Visit logged".to_string(),
        is_new,
    })
}

/// Supported gate sites
#[utoipa::path(
    get,
    path = "/api/sites",
    responses((status = 200, description = "Supported sites", body = [SiteInfo])),
    tag = "service"
)]
pub async fn list_sites() -> Json<Vec<SiteInfo>> {
    Json(
        sites::all()
            .iter()
            .map(|site| SiteInfo {
                id: site.id.to_string(),
                short_host: site.short_host.to_string(),
            })
            .collect(),
    )
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "service"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Server is running".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::ScriptedBrowser;
    use crate::config::ResolverConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(browser: &ScriptedBrowser) -> Router {
        let resolver = Resolver::new(Arc::new(browser.clone()), ResolverConfig::immediate());
        let state = AppState::new(resolver, 2, GeoLocator::new(false), Notifier::disabled());
        router(Arc::new(state), "does-not-exist")
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("user-agent", "test-agent")
            .header("x-forwarded-for", "203.0.113.5")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_bypass_success() {
        let browser = ScriptedBrowser::serving_html(
            r#"<a href="https://cdn.example.com/file.zip">Get Link</a>"#,
        );
        let (status, body) = post_json(
            app(&browser),
            "/api/bypass",
            r#"{"site":"shr2link","urlPath":"https://shr2.link/89BVVVXW"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["downloadUrl"], "https://cdn.example.com/file.zip");
        assert_eq!(body["originalUrl"], "https://shr2link.com/89BVVVXW");
        assert_eq!(browser.log.closed(), 1);
    }

    #[tokio::test]
    async fn test_bypass_missing_parameters() {
        let browser = ScriptedBrowser::default();
        let (status, body) =
            post_json(app(&browser), "/api/bypass", r#"{"site":"shr2link","urlPath":"  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Required parameters are missing");
        assert_eq!(browser.log.opened(), 0);
    }

    #[tokio::test]
    async fn test_bypass_unreadable_body_is_missing_parameters() {
        let browser = ScriptedBrowser::default();
        let cases = [
            (None, r#"{"site":"shr2link","urlPath":"abc"}"#),
            (Some("application/json"), "not json"),
            (Some("application/json"), r#"{"site":5,"urlPath":"abc"}"#),
        ];

        for (content_type, body) in cases {
            let mut request = Request::builder().method("POST").uri("/api/bypass");
            if let Some(content_type) = content_type {
                request = request.header("content-type", content_type);
            }
            let response = app(&browser)
                .oneshot(request.body(Body::from(body)).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["success"], false);
            assert_eq!(json["error"], "Required parameters are missing");
        }
        assert_eq!(browser.log.opened(), 0);
    }

    #[tokio::test]
    async fn test_bypass_unsupported_site() {
        let browser = ScriptedBrowser::default();
        let (status, body) =
            post_json(app(&browser), "/api/bypass", r#"{"site":"adfly","urlPath":"abc"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "This website is not currently supported");
        assert_eq!(browser.log.opened(), 0);
    }

    #[tokio::test]
    async fn test_bypass_not_found() {
        let browser = ScriptedBrowser::serving_html("<div>Advertisement</div>");
        let (status, body) =
            post_json(app(&browser), "/api/bypass", r#"{"site":"linkjust","urlPath":"abc"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Download link not found - please try again");
    }

    #[tokio::test]
    async fn test_bypass_session_failure() {
        let browser = ScriptedBrowser::failing_navigation();
        let (status, body) =
            post_json(app(&browser), "/api/bypass", r#"{"site":"linkjust","urlPath":"abc"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Service temporarily unavailable");
        assert_eq!(browser.log.closed(), 1);
    }

    #[tokio::test]
    async fn test_visit_dedupes_visitors() {
        let app = app(&ScriptedBrowser::default());
        let (status, first) = post_json(app.clone(), "/api/visit", "{}").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["isNew"], true);
        let (_, second) = post_json(app, "/api/visit", "{}").await;
        assert_eq!(second["isNew"], false);
    }

    #[tokio::test]
    async fn test_health_and_sites() {
        let app = app(&ScriptedBrowser::default());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/api/sites").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let sites: Vec<SiteInfo> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(sites.len(), 5);
        assert!(sites.iter().any(|s| s.id == "shr2link" && s.short_host == "shr2.link"));
    }
}
