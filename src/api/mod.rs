use crate::auth::{
    AuthBackends, AuthConfig, AuthSecrets, AuthService,
    audit::MemoryAuditSink,
    delegation::session::MemoryImpersonationStore,
    guard::{
        policy::{PolicyTable, RoutePolicy},
        transport::TENANT_HEADER,
    },
    postgres::PgStore,
    stores::{MemoryIdentityStore, MemoryPermissionStore, MemoryTenantDirectory},
    two_factor::{
        factor_store::MemoryFactorStore,
        session_store::{MemoryCounterStore, MemorySessionStore},
    },
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::from_fn_with_state,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod middleware;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Routes that skip the guard entirely. Everything else requires a valid token.
#[must_use]
pub fn policy_table() -> PolicyTable {
    PolicyTable::new()
        .route("/health", RoutePolicy::exempt())
        .route("/v1/auth/login", RoutePolicy::exempt())
        .route("/v1/auth/2fa/verify", RoutePolicy::exempt())
        .route("/v1/auth/logout", RoutePolicy::exempt())
        .route("/v1/admin/audit", RoutePolicy::super_admin())
}

/// Build the full application: documented routes behind the guard, the docs
/// UI, request ids, tracing and CORS.
///
/// # Errors
/// Returns an error if the frontend base URL cannot be turned into a CORS origin.
pub fn app(auth: Arc<AuthService>, pool: Option<PgPool>) -> Result<Router> {
    let frontend_origin = frontend_origin(auth.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(TENANT_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let guard_state = middleware::GuardState::new(auth.clone(), policy_table());
    let (router, openapi) = openapi::api_router().split_for_parts();

    let mut app = router
        .route_layer(from_fn_with_state(guard_state, middleware::guard))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi));
    if let Some(pool) = pool {
        app = app.layer(Extension(pool));
    }

    Ok(app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(auth)),
    ))
}

/// Start the server
/// # Errors
/// Return error if the database is unreachable or the listener cannot bind
pub async fn new(
    port: u16,
    dsn: Option<String>,
    auth_config: AuthConfig,
    secrets: AuthSecrets,
) -> Result<()> {
    let (backends, pool) = match dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(&dsn)
                .await
                .context("Failed to connect to database")?;
            (postgres_backends(&pool), Some(pool))
        }
        None => {
            warn!("No DSN configured, using in-memory stores");
            (memory_backends(), None)
        }
    };

    let auth = Arc::new(AuthService::new(auth_config, &secrets, backends));
    let app = app(auth, pool)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

#[must_use]
pub fn postgres_backends(pool: &PgPool) -> AuthBackends {
    let store = Arc::new(PgStore::new(pool.clone()));
    AuthBackends {
        identities: store.clone(),
        tenants: store.clone(),
        permissions: store.clone(),
        impersonations: store.clone(),
        pending_sessions: Arc::new(MemorySessionStore::new()),
        counters: Arc::new(MemoryCounterStore::new()),
        factors: store.clone(),
        audit: store,
    }
}

#[must_use]
pub fn memory_backends() -> AuthBackends {
    AuthBackends {
        identities: Arc::new(MemoryIdentityStore::new()),
        tenants: Arc::new(MemoryTenantDirectory::new()),
        permissions: Arc::new(MemoryPermissionStore::new()),
        impersonations: Arc::new(MemoryImpersonationStore::new()),
        pending_sessions: Arc::new(MemorySessionStore::new()),
        counters: Arc::new(MemoryCounterStore::new()),
        factors: Arc::new(MemoryFactorStore::new()),
        audit: Arc::new(MemoryAuditSink::new()),
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &Url) -> Result<HeaderValue> {
    let host = frontend_base_url.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = frontend_base_url
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", frontend_base_url.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_keeps_explicit_port() {
        let url = Url::parse("https://app.example.com:8443/some/path").unwrap();
        assert_eq!(
            frontend_origin(&url).unwrap(),
            HeaderValue::from_static("https://app.example.com:8443")
        );
        let url = Url::parse("https://app.example.com/").unwrap();
        assert_eq!(
            frontend_origin(&url).unwrap(),
            HeaderValue::from_static("https://app.example.com")
        );
    }

    #[test]
    fn public_routes_are_exempt() {
        let table = policy_table();
        for path in ["/health", "/v1/auth/login", "/v1/auth/2fa/verify", "/v1/auth/logout"] {
            assert!(table.policy_for(path).exempt, "{path} should be exempt");
        }
        assert!(!table.policy_for("/v1/auth/session").exempt);
        assert!(table.policy_for("/v1/admin/audit").super_admin);
    }
}
