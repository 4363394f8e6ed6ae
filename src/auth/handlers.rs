//! Authentication handlers

use axum::extract::{Extension, Json};
use axum::http::StatusCode;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::extractors::AuthedUser;
use super::models::{LoginPayload, Principal, RegisterPayload, Role, User};
use super::password::{hash_password, verify_password};
use super::token::{default_ttl, AuthError};
use crate::common::{generate_user_id, safe_email_log, ApiError, AppState};

/// Map a token-issuance failure onto the HTTP boundary.
fn issue_error(e: AuthError) -> ApiError {
    match e {
        AuthError::Misconfigured => ApiError::Misconfigured("JWT secret not configured".into()),
        other => {
            error!(error = %other, "JWT encoding error during authentication");
            ApiError::InternalServer("jwt error".to_string())
        }
    }
}

/// POST /api/auth/register
/// Creates a local account and issues a bearer token
///
/// # Request Body
/// ```json
/// {
///   "email": "a@b.com",
///   "password": "...",
///   "name": "optional"
/// }
/// ```
///
/// # Response
/// `201 Created` with `{"token": "<jwt>"}`
pub async fn register(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let state = state_lock.read().await.clone();

    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("email and password required".to_string()));
    }

    let existing: Option<User> = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::DatabaseError)?;

    if existing.is_some() {
        warn!(email = %safe_email_log(&email), "Registration rejected: email already in use");
        return Err(ApiError::Conflict("email already in use".to_string()));
    }

    let password_hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Password hashing failed during registration");
        ApiError::InternalServer("registration failed".to_string())
    })?;

    let id = generate_user_id();
    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role) VALUES (?, ?, ?, ?, 'user')",
    )
    .bind(&id)
    .bind(&email)
    .bind(payload.name.as_deref())
    .bind(&password_hash)
    .execute(&state.db)
    .await
    .map_err(|e| {
        error!(
            error = %e,
            email = %safe_email_log(&email),
            "Database error inserting new user during registration"
        );
        ApiError::DatabaseError(e)
    })?;

    let token = state
        .token_codec
        .issue(
            &Principal {
                id: id.clone(),
                role: Role::User,
            },
            default_ttl(),
        )
        .map_err(issue_error)?;

    info!(
        user_id = %id,
        email = %safe_email_log(&email),
        "New account registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "token": token })),
    ))
}

/// POST /api/auth/login
/// Verifies an email/password pair and issues a bearer token
///
/// # Response
/// ```json
/// {
///   "token": "<jwt>"
/// }
/// ```
pub async fn login(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("email and password required".to_string()));
    }

    let user: Option<User> = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::DatabaseError)?;

    // One rejection message for unknown email, missing hash and wrong
    // password; the logs carry the difference.
    let user = match user {
        Some(u) => u,
        None => {
            warn!(email = %safe_email_log(&email), "Login failed: unknown email");
            return Err(ApiError::Unauthorized("invalid credentials".to_string()));
        }
    };

    let verified = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&payload.password, hash))
        .unwrap_or(false);

    if !verified {
        warn!(
            user_id = %user.id,
            email = %safe_email_log(&email),
            "Login failed: password verification failed"
        );
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let token = state
        .token_codec
        .issue(
            &Principal {
                id: user.id.clone(),
                role: user.account_role(),
            },
            default_ttl(),
        )
        .map_err(issue_error)?;

    info!(
        user_id = %user.id,
        email = %safe_email_log(&email),
        "User authenticated via password login"
    );

    Ok(Json(serde_json::json!({ "token": token })))
}

/// GET /api/me
/// Returns the current authenticated user's information
#[axum::debug_handler]
pub async fn me_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.authorize(&[Role::Admin, Role::User])?;

    let state = state_lock.read().await.clone();

    let user: Option<User> = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&authed.id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::DatabaseError)?;

    match user {
        Some(user) => {
            let role = user.account_role();
            Ok(Json(serde_json::json!({
                "user": user,
                "role": role.as_str(),
            })))
        }
        // The anonymous dev principal has no account row; answer with the
        // principal itself so the local loop keeps working.
        None if state.auth_mode.is_bypass() => Ok(Json(serde_json::json!({
            "user": {
                "id": authed.id,
                "email": null,
                "name": "Dev User",
                "role": authed.role.as_str(),
            },
            "role": authed.role.as_str(),
        }))),
        None => {
            warn!(user_id = %authed.id, "Authenticated principal has no account row");
            Err(ApiError::NotFound("user not found".to_string()))
        }
    }
}
