//! Admin routes

use axum::{routing::get, Router};

use super::handlers;

/// Creates and returns the admin router
///
/// # Routes
/// - `GET /api/admin/users` - Account listing (admin role required)
pub fn admin_routes() -> Router {
    Router::new().route("/api/admin/users", get(handlers::get_users))
}
