//! HTTP application: shared state and route wiring.

use crate::auth::{
    api as auth_api, auth_middleware,
    middleware::{RequirePermission, RequireRole},
    models::UserRole,
    require_permission, require_role, Authenticator,
};
use crate::licenses::{api as license_api, LicenseStore};
use crate::middleware::{rate_limit_middleware, request_logging, security_headers, RateLimiters};
use axum::{
    extract::FromRef,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub licenses: Arc<dyn LicenseStore>,
    pub rate_limits: RateLimiters,
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

impl FromRef<AppState> for Arc<dyn LicenseStore> {
    fn from_ref(state: &AppState) -> Self {
        state.licenses.clone()
    }
}

fn with_permission(routes: Router<AppState>, required: &'static str) -> Router<AppState> {
    routes.route_layer(middleware::from_fn_with_state(
        RequirePermission(required),
        require_permission,
    ))
}

pub fn build_router(state: AppState) -> Router {
    let limits = state.rate_limits.clone();

    // Login: unauthenticated, keyed by address
    let login_routes = Router::new()
        .route("/api/auth/login", post(auth_api::login))
        .route_layer(middleware::from_fn_with_state(
            limits.login.clone(),
            rate_limit_middleware,
        ));

    let audit_routes = with_permission(
        Router::new().route("/api/auth/logs", get(auth_api::get_auth_logs)),
        "manage_users",
    );

    let admin_routes = Router::new()
        .route("/api/admin/users", get(auth_api::list_users))
        .route_layer(middleware::from_fn_with_state(
            RequireRole(UserRole::Admin),
            require_role,
        ));

    let license_read = with_permission(
        Router::new().route("/api/licenses", get(license_api::list_licenses)),
        "read",
    );

    let license_write = with_permission(
        Router::new()
            .route("/api/licenses/add", post(license_api::add_license))
            .route("/api/licenses/renew", post(license_api::renew_license))
            .route("/api/licenses/delete", delete(license_api::delete_license)),
        "write",
    );

    let license_delete = with_permission(
        Router::new().route("/api/licenses/disable", post(license_api::disable_license)),
        "delete",
    );

    // Auth gate runs first (outermost), then the per-user api budget
    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route("/api/auth/verify", get(auth_api::verify_token))
        .route("/api/auth/logout", post(auth_api::logout))
        .route("/api/auth/2fa/setup", post(auth_api::setup_two_factor))
        .route("/api/auth/2fa/enable", post(auth_api::enable_two_factor))
        .route("/api/auth/2fa/disable", post(auth_api::disable_two_factor))
        .route("/api/auth/change-password", post(auth_api::change_password))
        .merge(audit_routes)
        .merge(admin_routes)
        .merge(license_read)
        .merge(license_write)
        .merge(license_delete)
        .route_layer(middleware::from_fn_with_state(
            limits.api.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            auth_middleware,
        ));

    let validation_routes = Router::new()
        .route(
            "/api/licenses/validate",
            post(license_api::validate_license),
        )
        .route_layer(middleware::from_fn_with_state(
            limits.validation.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(login_routes)
        .merge(protected_routes)
        .merge(validation_routes)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_logging))
                .layer(middleware::from_fn(security_headers))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
