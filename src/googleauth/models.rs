//! Google credential data models

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Per-user Google credential record, one row per local account.
///
/// `access_token` and `refresh_token` are independently nullable; both
/// absent means "not connected". `expires_at` (RFC3339) is advisory for the
/// access token only; the refresh token has no tracked expiry.
#[derive(FromRow, Debug, Clone)]
pub struct GoogleAccount {
    pub user_id: String,
    pub google_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl GoogleAccount {
    pub fn is_connected(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// The caller-visible view of a credential record. Tokens never appear here.
#[derive(Serialize, Debug)]
pub struct GoogleAccountPublic {
    pub google_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: Option<String>,
}

impl From<&GoogleAccount> for GoogleAccountPublic {
    fn from(account: &GoogleAccount) -> Self {
        Self {
            google_id: account.google_id.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            picture: account.picture.clone(),
            expires_at: account.expires_at.clone(),
            created_at: account.created_at.clone(),
        }
    }
}
