//! Google OAuth lifecycle handlers: consent redirect, callback, connection
//! status, forced refresh, disconnect.

use axum::extract::{Extension, Query};
use axum::response::Redirect;
use axum::Json;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::models::GoogleAccountPublic;
use super::refresher;
use super::store::{self, CredentialUpdate};
use crate::auth::models::{Principal, Role};
use crate::auth::token::default_ttl;
use crate::auth::AuthedUser;
use crate::common::{safe_email_log, ApiError, AppState};
use crate::services::google::GoogleError;

/// Map provider-side failures onto the HTTP boundary. Details go to the log,
/// never into the response body.
fn oauth_error(e: GoogleError) -> ApiError {
    match e {
        GoogleError::NotConfigured => {
            ApiError::Misconfigured("Google OAuth client not configured".to_string())
        }
        GoogleError::IdTokenInvalid(detail) => {
            warn!(detail = %detail, "Identity assertion rejected during OAuth callback");
            ApiError::BadRequest("identity verification failed".to_string())
        }
        GoogleError::ExchangeFailed(detail) => {
            error!(detail = %detail, "Authorization code exchange failed");
            ApiError::BadRequest("authorization code exchange failed".to_string())
        }
        GoogleError::Database(e) => ApiError::DatabaseError(e),
        other => {
            error!(error = %other, "OAuth callback failed");
            ApiError::InternalServer("oauth exchange failed".to_string())
        }
    }
}

/// GET /api/auth/google/start - Start the Google OAuth flow
///
/// Redirects to Google's consent page. An optional `next` query parameter
/// (the caller's post-login destination) rides along in `state`.
pub async fn google_oauth_start(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, ApiError> {
    let state = state_lock.read().await.clone();

    let next = params.get("next").map(|s| s.as_str());
    let auth_url = state
        .google_service
        .authorization_url(next)
        .map_err(oauth_error)?;

    info!("Redirecting to Google OAuth consent page");
    Ok(Redirect::to(&auth_url))
}

/// GET /api/auth/google/callback - Handle the OAuth callback from Google
///
/// Exchanges the one-time code, verifies the identity assertion, links or
/// creates the local account, upserts the credential record, then redirects
/// to the web frontend with a freshly issued bearer token. Account and
/// credential writes commit in one transaction, or not at all.
pub async fn google_oauth_callback(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, ApiError> {
    let state = state_lock.read().await.clone();

    if let Some(error) = params.get("error") {
        warn!(oauth_error = %error, "Google OAuth returned an error");
        return Err(ApiError::BadRequest(
            "authorization was denied by the provider".to_string(),
        ));
    }

    // Reject before any provider contact.
    let code = params
        .get("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            warn!("OAuth callback missing authorization code");
            ApiError::BadRequest("missing code".to_string())
        })?;

    let tokens = state
        .google_service
        .exchange_code(code)
        .await
        .map_err(oauth_error)?;

    let id_token = tokens.id_token.as_deref().ok_or_else(|| {
        error!("Token exchange response carried no identity token");
        ApiError::BadRequest("identity verification failed".to_string())
    })?;

    let identity = state
        .google_service
        .verify_id_token(id_token)
        .await
        .map_err(oauth_error)?;

    let mut tx = state.db.begin().await.map_err(ApiError::DatabaseError)?;

    let existing_user = match identity.email.as_deref() {
        Some(email) => store::find_account_by_email(&mut tx, email)
            .await
            .map_err(ApiError::DatabaseError)?,
        None => None,
    };

    let user = match existing_user {
        Some(user) => {
            debug!(
                user_id = %user.id,
                google_id = %identity.google_id,
                "Linking Google credential to existing account"
            );
            user
        }
        None => {
            let user = store::create_oauth_account(&mut tx, &identity)
                .await
                .map_err(ApiError::DatabaseError)?;
            info!(
                user_id = %user.id,
                email = ?identity.email.as_deref().map(safe_email_log),
                "Created new account via Google sign-in"
            );
            user
        }
    };

    let expires_at = (Utc::now() + Duration::seconds(tokens.expires_in)).to_rfc3339();
    let update = CredentialUpdate {
        google_id: Some(identity.google_id.clone()),
        email: identity.email.clone(),
        name: identity.name.clone(),
        picture: identity.picture.clone(),
        access_token: Some(tokens.access_token.clone()),
        refresh_token: tokens.refresh_token.clone(),
        expires_at: Some(expires_at),
    };

    let existing_credential = store::find_by_user_id(&mut *tx, &user.id)
        .await
        .map_err(ApiError::DatabaseError)?;
    let merged = store::merge(&user.id, existing_credential.as_ref(), &update);
    store::upsert(&mut *tx, &merged)
        .await
        .map_err(ApiError::DatabaseError)?;

    tx.commit().await.map_err(ApiError::DatabaseError)?;

    let token = state
        .token_codec
        .issue(
            &Principal {
                id: user.id.clone(),
                role: user.account_role(),
            },
            default_ttl(),
        )
        .map_err(|e| match e {
            crate::auth::token::AuthError::Misconfigured => {
                ApiError::Misconfigured("JWT secret not configured".to_string())
            }
            other => {
                error!(error = %other, "JWT encoding error after OAuth callback");
                ApiError::InternalServer("jwt error".to_string())
            }
        })?;

    // The state parameter is opaque to the provider; pass it back as `next`
    // exactly as received.
    let next_part = params
        .get("state")
        .filter(|s| !s.is_empty())
        .map(|s| format!("&next={}", s))
        .unwrap_or_default();

    let redirect_url = format!(
        "{}/google-oauth/success?token={}{}",
        state.config.web_base_url,
        urlencoding::encode(&token),
        next_part
    );

    info!(
        user_id = %user.id,
        refresh_token_present = merged.refresh_token.is_some(),
        "Google OAuth sign-in completed"
    );

    Ok(Redirect::to(&redirect_url))
}

/// GET /api/auth/google/account - Connection status for the current user
///
/// Never exposes token material; `connected` means any token is stored.
pub async fn google_account(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.authorize(&[Role::Admin, Role::User])?;

    let state = state_lock.read().await.clone();

    let account = store::find_by_user_id(&state.db, &authed.id)
        .await
        .map_err(ApiError::DatabaseError)?;

    match account {
        None => Ok(Json(serde_json::json!({
            "connected": false,
            "account": null,
        }))),
        Some(account) => {
            let connected = account.is_connected();
            Ok(Json(serde_json::json!({
                "connected": connected,
                "account": GoogleAccountPublic::from(&account),
            })))
        }
    }
}

/// POST /api/auth/google/refresh - Force a refresh of the stored access token
pub async fn google_refresh(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.authorize(&[Role::Admin, Role::User])?;

    let state = state_lock.read().await.clone();

    match refresher::force_refresh(&state, &authed.id).await {
        Ok(Some(_)) => Ok(Json(serde_json::json!({
            "success": true,
            "message": "Access token refreshed successfully",
            // Google access tokens typically last 1 hour
            "expires_in": 3600,
        }))),
        Ok(None) => Err(ApiError::BadRequest(
            "no refresh token available".to_string(),
        )),
        Err(GoogleError::RefreshRejected(_)) => Err(ApiError::BadRequest(
            "refresh token no longer valid".to_string(),
        )),
        Err(GoogleError::Database(e)) => Err(ApiError::DatabaseError(e)),
        Err(e) => {
            error!(error = %e, user_id = %authed.id, "Token refresh failed");
            Err(ApiError::InternalServer(
                "failed to refresh access token".to_string(),
            ))
        }
    }
}

/// POST /api/auth/google/disconnect - Revoke and clear the stored credential
pub async fn google_disconnect(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.authorize(&[Role::Admin, Role::User])?;

    let state = state_lock.read().await.clone();
    disconnect(&state, &authed.id).await?;

    Ok(Json(serde_json::json!({ "disconnected": true })))
}

/// Best-effort provider revocation followed by an unconditional local clear.
/// Idempotent: succeeds for already-disconnected and never-connected users.
pub(crate) async fn disconnect(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    let account = store::find_by_user_id(&state.db, user_id)
        .await
        .map_err(ApiError::DatabaseError)?;

    let Some(account) = account else {
        debug!(user_id = %user_id, "Disconnect requested with no stored credential");
        return Ok(());
    };

    // An unreachable provider must not block the local disconnect; revocation
    // failures are logged and swallowed.
    if let Some(refresh_token) = account.refresh_token.as_deref() {
        if let Err(e) = state.google_service.revoke_token(refresh_token).await {
            warn!(error = %e, user_id = %user_id, "Refresh token revocation failed; continuing");
        }
    }
    if let Some(access_token) = account.access_token.as_deref() {
        if let Err(e) = state.google_service.revoke_token(access_token).await {
            warn!(error = %e, user_id = %user_id, "Access token revocation failed; continuing");
        }
    }

    store::clear_tokens(&state.db, user_id)
        .await
        .map_err(ApiError::DatabaseError)?;

    info!(user_id = %user_id, "Google credential disconnected");
    Ok(())
}
