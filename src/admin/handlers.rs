// src/admin/handlers.rs

use axum::extract::Extension;
use axum::Json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::auth::{AuthedUser, Role, User};
use crate::common::{ApiError, AppState};

/// GET /api/admin/users - List all local accounts
pub async fn get_users(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<Vec<User>>, ApiError> {
    authed.authorize(&[Role::Admin])?;

    let state = state_lock.read().await.clone();

    info!(admin_user_id = %authed.id, "Fetching users list");

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::DatabaseError)?;

    Ok(Json(users))
}
