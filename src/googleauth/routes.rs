//! Google OAuth routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the Google OAuth router
///
/// # Routes
/// - `GET /api/auth/google/start` - Redirect to Google's consent page
/// - `GET /api/auth/google/callback` - Code exchange and account linking
/// - `GET /api/auth/google/account` - Connection status (authenticated)
/// - `POST /api/auth/google/refresh` - Force an access-token refresh (authenticated)
/// - `POST /api/auth/google/disconnect` - Revoke and clear the credential (authenticated)
pub fn googleauth_routes() -> Router {
    Router::new()
        .route("/api/auth/google/start", get(handlers::google_oauth_start))
        .route(
            "/api/auth/google/callback",
            get(handlers::google_oauth_callback),
        )
        .route("/api/auth/google/account", get(handlers::google_account))
        .route("/api/auth/google/refresh", post(handlers::google_refresh))
        .route(
            "/api/auth/google/disconnect",
            post(handlers::google_disconnect),
        )
}
