//! License Server
//! Mission: Issue and validate license keys behind an authenticated admin API

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use license_server::{
    auth::{
        seed_default_users, Authenticator, JwtHandler, PasswordVerifier, SqliteAuditLog,
        TotpEngine, UserStore,
    },
    build_router,
    licenses::SqliteLicenseStore,
    middleware::spawn_cleanup,
    AppState, Config,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let config = Config::parse();
    info!("🚀 License Server Starting");

    let auth_db_path = config.auth_db_path();
    let passwords = PasswordVerifier::new(config.bcrypt_cost);
    let user_store = Arc::new(UserStore::new(&auth_db_path)?);
    seed_default_users(user_store.as_ref(), &passwords)
        .context("Failed to seed default users")?;
    let audit_log = Arc::new(SqliteAuditLog::new(&auth_db_path)?);

    let jwt_handler = Arc::new(
        JwtHandler::new(config.jwt_secret()).with_expiration_hours(config.token_ttl_hours),
    );
    let authenticator = Arc::new(Authenticator::new(
        user_store,
        audit_log,
        jwt_handler,
        TotpEngine::new(config.totp_issuer.clone(), config.totp_window),
        passwords,
    ));
    info!("🔐 Authentication initialized at: {}", auth_db_path);

    let license_db_path = config.license_db_path();
    let licenses = Arc::new(SqliteLicenseStore::new(&license_db_path)?);
    info!("🔑 License store initialized at: {}", license_db_path);

    let rate_limits = config.rate_limits();
    spawn_cleanup(rate_limits.clone(), config.sweep_interval());

    let app = build_router(AppState {
        authenticator,
        licenses,
        rate_limits,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Initialize tracing with env-driven filtering
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "license_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate-root .env when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
