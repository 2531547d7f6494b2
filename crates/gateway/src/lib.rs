//! HTTP API gateway for DentCoach.
//!
//! Exposes the chat API, knowledge and resource administration, health
//! checks and pairing. Built on Axum.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use dentcoach_coach::Coach;
use dentcoach_config::{AppConfig, GatewayConfig};
use dentcoach_core::resource::ResourceStore;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Maximum number of active paired tokens.
const MAX_PAIRED_TOKENS: usize = 100;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub coach: Coach,
    pub resources: Arc<dyn ResourceStore>,
    pub pairing_code: Option<String>,
    /// Tokens from configuration; never evicted.
    api_tokens: Vec<String>,
    /// Tokens issued by `/pair`, oldest first, at most `MAX_PAIRED_TOKENS`.
    paired_tokens: RwLock<VecDeque<String>>,
}

impl GatewayState {
    pub fn new(
        coach: Coach,
        resources: Arc<dyn ResourceStore>,
        pairing_code: Option<String>,
        api_tokens: Vec<String>,
    ) -> Self {
        Self {
            coach,
            resources,
            pairing_code,
            api_tokens,
            paired_tokens: RwLock::new(VecDeque::new()),
        }
    }

    async fn accepts(&self, token: &str) -> bool {
        self.api_tokens.iter().any(|t| t == token)
            || self.paired_tokens.read().await.iter().any(|t| t == token)
    }

    /// Record a newly paired token, evicting the oldest paired one at capacity.
    async fn add_paired(&self, token: String) -> usize {
        let mut tokens = self.paired_tokens.write().await;
        if tokens.len() >= MAX_PAIRED_TOKENS {
            tokens.pop_front();
        }
        tokens.push_back(token);
        tokens.len()
    }

    /// Whether requests must carry a bearer token at all.
    ///
    /// Auth is off only when pairing is disabled and no tokens are
    /// configured, i.e. an explicitly open local deployment.
    fn auth_required(&self) -> bool {
        self.pairing_code.is_some() || !self.api_tokens.is_empty()
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router.
///
/// Layers applied:
/// - Bearer token authentication on all /api routes
/// - CORS restricted to the configured origin
/// - Request body size limit (1 MB)
/// - In-memory rate limiting per client (health exempt)
/// - HTTP trace logging
pub fn build_router(state: SharedState, gateway: &GatewayConfig) -> Router {
    let api = api::api_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/pair", post(pair_handler))
        .with_state(state)
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(1024 * 1024));

    if gateway.rate_limit_per_minute > 0 {
        let rate_limiter = Arc::new(RateLimiter::new(
            gateway.rate_limit_per_minute,
            Duration::from_secs(60),
        ));
        app = app.layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }));
    }

    match gateway.allowed_origin.parse::<HeaderValue>() {
        Ok(origin) => {
            let cors = CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .max_age(Duration::from_secs(3600));
            app = app.layer(cors);
        }
        Err(e) => {
            warn!(origin = %gateway.allowed_origin, error = %e, "Invalid allowed_origin; CORS disabled");
        }
    }

    app.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds the knowledge store, provider and coach once and shares them
/// across all requests.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.has_api_key() {
        warn!("No API key configured; completion requests will fail until one is set");
    }

    let stores = dentcoach_knowledge::open_store(
        &config.knowledge.backend,
        &config.knowledge.database_path(),
    )
    .await?;

    let router = dentcoach_providers::build_from_config(&config);
    let provider = router
        .default_provider()
        .ok_or("No default provider configured")?;

    let coach = Coach::from_config(&config, stores.knowledge, provider);

    let pairing_code = if config.gateway.require_pairing {
        let code = pairing_code();
        info!(code = %code, "Pairing code generated; use POST /pair with X-Pairing-Code header");
        Some(code)
    } else {
        None
    };

    if pairing_code.is_none() && config.gateway.api_tokens.is_empty() {
        warn!("Pairing disabled and no api_tokens configured; the API is unauthenticated");
    }

    let state = Arc::new(GatewayState::new(
        coach,
        stores.resources,
        pairing_code,
        config.gateway.api_tokens.clone(),
    ));
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, model = %config.model(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key (bearer token or anonymous).
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check if the client is within rate limits. Returns `true` if allowed.
    fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        // Evict stale clients once the map grows large
        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Returns 429 Too Many Requests when a client exceeds its budget.
/// `/health` is exempt so monitoring can poll it freely.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(20).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct PairResponse {
    token: String,
}

/// Exchange the startup pairing code for a bearer token.
async fn pair_handler(
    State(state): State<SharedState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<PairResponse>, StatusCode> {
    let Some(expected) = state.pairing_code.as_deref() else {
        return Err(StatusCode::NOT_FOUND);
    };

    let provided = headers.get("X-Pairing-Code").and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        warn!("Pairing attempt with wrong code");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let token = uuid::Uuid::new_v4().to_string();

    let active = state.add_paired(token.clone()).await;
    info!(paired_tokens = active, "Client paired");

    Ok(Json(PairResponse { token }))
}

/// Generate an 8-digit pairing code from a CSPRNG.
fn pairing_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("{:08}", rng.random_range(10_000_000..100_000_000u32))
}

/// Authentication middleware for the /api routes.
///
/// Requires a valid `Authorization: Bearer <token>` header.
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if !state.auth_required() {
        return Ok(next.run(req).await);
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match provided {
        Some(token) => state.accepts(token).await,
        None => false,
    };

    if authorized {
        Ok(next.run(req).await)
    } else {
        warn!(path = %req.uri().path(), "Unauthorized API request; missing or invalid bearer token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use dentcoach_knowledge::InMemoryKnowledgeStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(pairing_code: Option<&str>, tokens: Vec<&str>) -> SharedState {
        let config = AppConfig::default();
        let provider = dentcoach_providers::build_from_config(&config)
            .default_provider()
            .unwrap();
        let store = InMemoryKnowledgeStore::new();
        let coach = Coach::new(Arc::new(store.clone()), provider, "test-model");
        Arc::new(GatewayState::new(
            coach,
            Arc::new(store),
            pairing_code.map(String::from),
            tokens.into_iter().map(String::from).collect(),
        ))
    }

    fn get_knowledge(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/knowledge");
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(state(Some("12345678"), vec![]), &GatewayConfig::default());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_requires_token() {
        let s = state(None, vec!["secret"]);
        let gateway = GatewayConfig::default();

        let response = build_router(s.clone(), &gateway)
            .oneshot(get_knowledge(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = build_router(s.clone(), &gateway)
            .oneshot(get_knowledge(Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = build_router(s, &gateway)
            .oneshot(get_knowledge(Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthenticated_chat_is_401() {
        let app = build_router(state(Some("12345678"), vec![]), &GatewayConfig::default());
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"messages":[{"role":"user","content":"Hi"}]}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn pairing_issues_usable_token() {
        let s = state(Some("12345678"), vec![]);
        let gateway = GatewayConfig::default();

        let bad = Request::builder()
            .method("POST")
            .uri("/pair")
            .header("X-Pairing-Code", "00000000")
            .body(Body::empty())
            .unwrap();
        let response = build_router(s.clone(), &gateway).oneshot(bad).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let good = Request::builder()
            .method("POST")
            .uri("/pair")
            .header("X-Pairing-Code", "12345678")
            .body(Body::empty())
            .unwrap();
        let response = build_router(s.clone(), &gateway).oneshot(good).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let token = json["token"].as_str().unwrap().to_string();

        let response = build_router(s, &gateway)
            .oneshot(get_knowledge(Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn configured_tokens_survive_pairing_eviction() {
        let s = state(Some("12345678"), vec!["secret"]);
        let gateway = GatewayConfig {
            rate_limit_per_minute: 0,
            ..GatewayConfig::default()
        };

        let mut first_paired = None;
        for _ in 0..=MAX_PAIRED_TOKENS {
            let req = Request::builder()
                .method("POST")
                .uri("/pair")
                .header("X-Pairing-Code", "12345678")
                .body(Body::empty())
                .unwrap();
            let response = build_router(s.clone(), &gateway).oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            first_paired.get_or_insert_with(|| json["token"].as_str().unwrap().to_string());
        }

        let response = build_router(s.clone(), &gateway)
            .oneshot(get_knowledge(Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The oldest paired token was evicted
        let response = build_router(s.clone(), &gateway)
            .oneshot(get_knowledge(first_paired.as_deref()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(s.paired_tokens.read().await.len(), MAX_PAIRED_TOKENS);
    }

    #[tokio::test]
    async fn open_mode_without_pairing_or_tokens() {
        let app = build_router(state(None, vec![]), &GatewayConfig::default());
        let response = app.oneshot(get_knowledge(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_exceeded() {
        let gateway = GatewayConfig {
            rate_limit_per_minute: 2,
            ..GatewayConfig::default()
        };
        let s = state(None, vec![]);
        let mut statuses = Vec::new();
        let app = build_router(s, &gateway);
        for _ in 0..3 {
            let response = app.clone().oneshot(get_knowledge(None)).await.unwrap();
            statuses.push(response.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );

        // Health stays reachable
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(req).await.unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn rate_limiter_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn pairing_code_is_eight_digits() {
        let code = pairing_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
