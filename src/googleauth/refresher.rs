//! On-demand access-token refresh with a per-user critical section.
//!
//! The read-check-refresh-write sequence must not interleave for the same
//! user: two concurrent callers either share one freshly stored token or
//! perform one redundant-but-harmless refresh, never a partial write.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::models::GoogleAccount;
use super::store::{self, CredentialUpdate};
use crate::common::{safe_token_log, AppState};
use crate::services::google::GoogleError;

/// Fixed lead time before the tracked expiry at which the access token is
/// proactively refreshed.
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 5 * 60;

/// Per-user async mutexes serializing the refresh sequence.
#[derive(Clone, Default)]
pub struct RefreshLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RefreshLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// True when the token is past (or within the safety margin of) its tracked
/// expiry, or has no tracked expiry at all.
fn due_for_refresh(expires_at: Option<chrono::DateTime<Utc>>) -> bool {
    match expires_at {
        Some(exp) => exp <= Utc::now() + Duration::seconds(REFRESH_SAFETY_MARGIN_SECS),
        None => true,
    }
}

/// Return a currently-valid Google access token for the user, transparently
/// refreshing against the stored refresh token when near expiry.
///
/// `Ok(None)` means there is nothing usable stored; the caller has to send
/// the user back through the consent flow.
pub async fn get_valid_access_token(
    state: &AppState,
    user_id: &str,
) -> Result<Option<String>, GoogleError> {
    // Fast path: nothing stored, or the stored token is still comfortably
    // valid. No lock, no network.
    let Some(account) = store::find_by_user_id(&state.db, user_id).await? else {
        return Ok(None);
    };
    let Some(access_token) = account.access_token.clone() else {
        debug!(user_id = %user_id, "No access token stored");
        return Ok(None);
    };
    if !due_for_refresh(account.expires_at_utc()) {
        debug!(
            user_id = %user_id,
            token = %safe_token_log(&access_token),
            "Using stored access token"
        );
        return Ok(Some(access_token));
    }

    let _guard = state.refresh_locks.acquire(user_id).await;

    // Re-read under the lock: a concurrent caller may have refreshed while
    // we were waiting.
    let Some(account) = store::find_by_user_id(&state.db, user_id).await? else {
        return Ok(None);
    };
    let Some(access_token) = account.access_token.clone() else {
        return Ok(None);
    };
    if !due_for_refresh(account.expires_at_utc()) {
        debug!(user_id = %user_id, "Access token already refreshed by a concurrent caller");
        return Ok(Some(access_token));
    }

    match account.refresh_token.clone() {
        Some(refresh_token) => refresh_locked(state, user_id, &account, &refresh_token)
            .await
            .map(Some),
        None => {
            warn!(
                user_id = %user_id,
                "Access token past safety margin and no refresh token stored"
            );
            Ok(None)
        }
    }
}

/// Refresh immediately, regardless of the tracked expiry.
///
/// `Ok(None)` when no credential or no refresh token is stored.
pub async fn force_refresh(
    state: &AppState,
    user_id: &str,
) -> Result<Option<String>, GoogleError> {
    let _guard = state.refresh_locks.acquire(user_id).await;

    let Some(account) = store::find_by_user_id(&state.db, user_id).await? else {
        return Ok(None);
    };
    match account.refresh_token.clone() {
        Some(refresh_token) => refresh_locked(state, user_id, &account, &refresh_token)
            .await
            .map(Some),
        None => Ok(None),
    }
}

/// The provider exchange plus persistence. Callers hold the user's lock.
async fn refresh_locked(
    state: &AppState,
    user_id: &str,
    account: &GoogleAccount,
    refresh_token: &str,
) -> Result<String, GoogleError> {
    match state.google_service.refresh_access_token(refresh_token).await {
        Ok(tokens) => {
            let expires_at = (Utc::now() + Duration::seconds(tokens.expires_in)).to_rfc3339();
            let update = CredentialUpdate {
                access_token: Some(tokens.access_token.clone()),
                // Providers rarely reissue the refresh token on a refresh
                // cycle; merge keeps the stored one when this is None.
                refresh_token: tokens.refresh_token.clone(),
                expires_at: Some(expires_at),
                ..Default::default()
            };
            let merged = store::merge(user_id, Some(account), &update);
            store::upsert(&state.db, &merged).await?;

            info!(user_id = %user_id, "Google access token refreshed");
            Ok(tokens.access_token)
        }
        Err(GoogleError::RefreshRejected(msg)) => {
            // The stored refresh token is dead. Clear it so subsequent calls
            // short-circuit to "not connected" instead of retrying a token
            // the provider will keep rejecting.
            warn!(
                user_id = %user_id,
                "Stored refresh token rejected by provider; clearing it"
            );
            store::clear_refresh_token(&state.db, user_id).await?;
            Err(GoogleError::RefreshRejected(msg))
        }
        Err(e) => Err(e),
    }
}
