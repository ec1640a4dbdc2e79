// ABOUTME: Main entry point for the memoria webapp serving memorial profiles and media
// ABOUTME: Sets up configuration, storage, routes, and the public uploads tree

use axum::{
    Json,
    extract::Path,
    response::Redirect,
    routing::{get, post, put},
    Router,
};
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

mod auth;
mod config;
mod email;
mod error;
mod media;
mod middleware;
mod profiles;
mod storage;
mod types;

#[cfg(test)]
mod storage_tests;

use auth::TokenService;
use config::Config;
use email::{EmailSender, LogMailer};
use media::MediaStore;
use storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub media: Arc<MediaStore>,
    pub tokens: TokenService,
    pub mailer: Arc<dyn EmailSender>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memoria=info,tower_http=info".into()),
        )
        .init();

    // Missing token-signing settings abort here, before anything listens.
    let config = Config::from_env()?;

    let storage = Arc::new(Storage::new(&config.database_url).await?);
    tokio::fs::create_dir_all(&config.uploads_dir).await?;
    let media = Arc::new(MediaStore::new(&config.uploads_dir));
    let tokens = TokenService::new(&config.jwt)?;

    let app_state = AppState {
        storage,
        media,
        tokens,
        mailer: Arc::new(LogMailer),
    };

    let app = app(app_state, &config.uploads_dir);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn app(state: AppState, uploads_dir: &FsPath) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ser-querido/:id", get(deep_link_redirect))
        // Users and auth
        .route("/api/users/register", post(auth::register))
        .route("/api/users/verify-email", get(auth::verify_email))
        .route("/api/users/login", post(auth::login))
        .route("/api/users/refresh-token", post(auth::refresh_token))
        .route("/api/users/forgot-password", post(auth::forgot_password))
        .route("/api/users/reset-password", post(auth::reset_password))
        .route("/api/users/me", get(auth::me))
        .route("/api/users", get(auth::list_users))
        .route(
            "/api/users/:id",
            get(auth::get_user)
                .put(auth::update_user)
                .delete(auth::delete_user),
        )
        // Profiles
        .route(
            "/api/profiles",
            post(profiles::create_profile).get(profiles::list_profiles),
        )
        .route("/api/profiles/mine", get(profiles::my_profiles))
        .route("/api/profiles/search/:term", get(profiles::search_profiles))
        .route(
            "/api/profiles/:id",
            get(profiles::get_profile).delete(profiles::delete_profile),
        )
        .route("/api/profiles/:id/field", put(profiles::update_field))
        .route("/api/profiles/:id/image", put(profiles::update_image))
        .route(
            "/api/profiles/:id/multimedia",
            post(profiles::add_multimedia).delete(profiles::delete_multimedia),
        )
        .route("/api/profiles/:id/qr", post(profiles::generate_qr))
        .route(
            "/api/profiles/:id/relations",
            post(profiles::add_relation).get(profiles::get_relations),
        )
        .route(
            "/api/profiles/:id/relations/:relation_id",
            put(profiles::update_relation).delete(profiles::delete_relation),
        )
        // Public read path for stored media
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "service": "memoria" }))
}

/// Target of the QR deep link; sends visitors to the public profile view.
async fn deep_link_redirect(Path(id): Path<String>) -> Redirect {
    Redirect::to(&format!("/api/profiles/{}", id))
}
