// Application state shared across all modules

use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::token::TokenCodec;
use crate::common::auth_mode::AuthMode;
use crate::common::config::AppConfig;
use crate::googleauth::refresher::RefreshLocks;
use crate::services::GoogleService;

/// Application state containing the database pool, provider client, and
/// configuration resolved once at startup
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub http: Client,
    pub config: AppConfig,
    pub auth_mode: AuthMode,
    pub token_codec: TokenCodec,
    pub google_service: Arc<GoogleService>,
    /// Per-user critical sections for the credential refresh path.
    pub refresh_locks: RefreshLocks,
}
