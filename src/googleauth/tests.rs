//! Tests for the Google credential lifecycle
//!
//! These tests run against an in-memory sqlite database and a local axum
//! server standing in for Google's token, tokeninfo and revocation
//! endpoints, so every provider interaction is observable.

#[cfg(test)]
mod tests {
    use super::super::handlers;
    use super::super::refresher::{force_refresh, get_valid_access_token, RefreshLocks};
    use super::super::store;
    use crate::auth::token::TokenCodec;
    use crate::common::{migrations, ApiError, AppConfig, AppState, AuthMode};
    use crate::services::google::{GoogleError, GoogleService};
    use axum::extract::{Extension, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::{Duration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn setup_test_db() -> SqlitePool {
        // One connection: a pooled ":memory:" database is per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        pool
    }

    /// Local stand-in for Google. `token_hits` counts POSTs to /token.
    async fn spawn_provider(
        token_hits: Arc<AtomicUsize>,
        token_status: StatusCode,
        token_body: serde_json::Value,
        identity_body: Option<serde_json::Value>,
    ) -> String {
        let identity = identity_body.unwrap_or_else(|| serde_json::json!({}));
        let app = Router::new()
            .route(
                "/token",
                post(move || {
                    let hits = token_hits.clone();
                    let body = token_body.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (token_status, Json(body))
                    }
                }),
            )
            .route(
                "/tokeninfo",
                get(move || {
                    let body = identity.clone();
                    async move { Json(body) }
                }),
            )
            .route("/revoke", post(|| async { Json(serde_json::json!({})) }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn google_service(base: &str) -> GoogleService {
        let mut svc = GoogleService::new(
            reqwest::Client::new(),
            Some("test_client_id".to_string()),
            Some("test_secret".to_string()),
            "http://localhost:8080/api/auth/google/callback".to_string(),
        );
        svc.token_endpoint = format!("{}/token", base);
        svc.tokeninfo_endpoint = format!("{}/tokeninfo", base);
        svc.revoke_endpoint = format!("{}/revoke", base);
        svc
    }

    fn test_state(pool: SqlitePool, svc: GoogleService) -> AppState {
        AppState {
            db: pool,
            http: reqwest::Client::new(),
            config: AppConfig {
                database_url: "sqlite::memory:".to_string(),
                port: 0,
                jwt_secret: Some("test_secret_key".to_string()),
                google_client_id: Some("test_client_id".to_string()),
                google_client_secret: Some("test_secret".to_string()),
                google_redirect_uri: "http://localhost:8080/api/auth/google/callback"
                    .to_string(),
                web_base_url: "http://localhost:3000".to_string(),
                cors_origins: String::new(),
            },
            auth_mode: AuthMode::Strict,
            token_codec: TokenCodec::new(Some("test_secret_key".to_string())),
            google_service: Arc::new(svc),
            refresh_locks: RefreshLocks::new(),
        }
    }

    async fn seed_credential(
        pool: &SqlitePool,
        user_id: &str,
        access: Option<&str>,
        refresh: Option<&str>,
        expires_in_secs: Option<i64>,
    ) {
        sqlx::query("INSERT INTO users (id, email, role) VALUES (?, ?, 'user')")
            .bind(user_id)
            .bind(format!("{}@example.com", user_id.to_lowercase()))
            .execute(pool)
            .await
            .unwrap();

        let expires_at =
            expires_in_secs.map(|s| (Utc::now() + Duration::seconds(s)).to_rfc3339());
        sqlx::query(
            r#"
            INSERT INTO google_accounts
                (user_id, google_id, email, access_token, refresh_token, expires_at)
            VALUES (?, 'g-123', ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(format!("{}@example.com", user_id.to_lowercase()))
        .bind(access)
        .bind(refresh)
        .bind(expires_at)
        .execute(pool)
        .await
        .unwrap();
    }

    fn refresh_ok_body() -> serde_json::Value {
        // No refresh_token: providers typically do not reissue it.
        serde_json::json!({
            "access_token": "refreshed-access-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        seed_credential(&pool, "U_A1", Some("stored-token"), Some("rt"), Some(600)).await;
        let state = test_state(pool, google_service(&base));

        let token = get_valid_access_token(&state, "U_A1").await.unwrap();

        assert_eq!(token.as_deref(), Some("stored-token"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_triggers_exactly_one_refresh() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        // Two minutes of validity left, inside the five-minute margin.
        seed_credential(
            &pool,
            "U_A2",
            Some("stale-token"),
            Some("stored-refresh"),
            Some(120),
        )
        .await;
        let state = test_state(pool, google_service(&base));

        let token = get_valid_access_token(&state, "U_A2").await.unwrap();

        assert_eq!(token.as_deref(), Some("refreshed-access-token"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let account = store::find_by_user_id(&state.db, "U_A2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.access_token.as_deref(), Some("refreshed-access-token"));
        // The provider did not reissue a refresh token; the stored one stays.
        assert_eq!(account.refresh_token.as_deref(), Some("stored-refresh"));
        let exp = account.expires_at_utc().unwrap();
        assert!(exp > Utc::now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_nothing_stored_returns_none_without_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        let state = test_state(pool, google_service(&base));

        // No row at all.
        assert!(get_valid_access_token(&state, "U_A3").await.unwrap().is_none());

        // A row with both tokens absent (post-disconnect shape).
        seed_credential(&state.db, "U_A4", None, None, None).await;
        assert!(get_valid_access_token(&state, "U_A4").await.unwrap().is_none());

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_without_refresh_token_returns_none() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        seed_credential(&pool, "U_A5", Some("stale-token"), None, Some(120)).await;
        let state = test_state(pool, google_service(&base));

        let token = get_valid_access_token(&state, "U_A5").await.unwrap();

        // Never serve a token already past its safety margin.
        assert!(token.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_converge_on_one_exchange() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        seed_credential(
            &pool,
            "U_A6",
            Some("expired-token"),
            Some("stored-refresh"),
            Some(-60),
        )
        .await;
        let state = test_state(pool, google_service(&base));

        let (a, b) = tokio::join!(
            get_valid_access_token(&state, "U_A6"),
            get_valid_access_token(&state, "U_A6"),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        // The loser of the lock race reuses the winner's stored token.
        assert_eq!(a.as_deref(), Some("refreshed-access-token"));
        assert_eq!(a, b);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let account = store::find_by_user_id(&state.db, "U_A6")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.access_token.as_deref(), Some("refreshed-access-token"));
        assert_eq!(account.refresh_token.as_deref(), Some("stored-refresh"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_stored_refresh_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(
            hits.clone(),
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "invalid_grant" }),
            None,
        )
        .await;
        let pool = setup_test_db().await;
        seed_credential(&pool, "U_A7", Some("stale-token"), Some("dead-refresh"), Some(60))
            .await;
        let state = test_state(pool, google_service(&base));

        let result = get_valid_access_token(&state, "U_A7").await;
        assert!(matches!(result, Err(GoogleError::RefreshRejected(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let account = store::find_by_user_id(&state.db, "U_A7")
            .await
            .unwrap()
            .unwrap();
        assert!(account.refresh_token.is_none());

        // Subsequent calls short-circuit without touching the provider again.
        let second = get_valid_access_token(&state, "U_A7").await.unwrap();
        assert!(second.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_without_refresh_token_returns_none() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        seed_credential(&pool, "U_A8", Some("still-valid"), None, Some(3600)).await;
        let state = test_state(pool, google_service(&base));

        assert!(force_refresh(&state, "U_A8").await.unwrap().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_survives_unreachable_provider() {
        let pool = setup_test_db().await;
        seed_credential(&pool, "U_A9", Some("access"), Some("refresh"), Some(3600)).await;

        // Revocation endpoint nobody is listening on.
        let mut svc = google_service("http://127.0.0.1:9");
        svc.revoke_endpoint = "http://127.0.0.1:9/revoke".to_string();
        let state = test_state(pool, svc);

        handlers::disconnect(&state, "U_A9").await.unwrap();

        let account = store::find_by_user_id(&state.db, "U_A9")
            .await
            .unwrap()
            .unwrap();
        assert!(account.access_token.is_none());
        assert!(account.refresh_token.is_none());
        assert!(account.expires_at.is_none());
        // Profile fields survive a disconnect.
        assert_eq!(account.google_id, "g-123");
        assert!(account.email.is_some());

        // Second disconnect, and one for a user that never connected.
        handlers::disconnect(&state, "U_A9").await.unwrap();
        handlers::disconnect(&state, "U_NEVER").await.unwrap();
    }

    #[tokio::test]
    async fn test_callback_without_code_fails_before_provider_contact() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(hits.clone(), StatusCode::OK, refresh_ok_body(), None).await;
        let pool = setup_test_db().await;
        let shared = Arc::new(RwLock::new(test_state(pool, google_service(&base))));

        let result = handlers::google_oauth_callback(
            Extension(shared.clone()),
            Query(HashMap::new()),
        )
        .await;

        match result {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, "missing code"),
            other => panic!("expected BadRequest, got {:?}", other.is_ok()),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // A provider-reported error is also rejected without an exchange.
        let mut params = HashMap::new();
        params.insert("error".to_string(), "access_denied".to_string());
        let result =
            handlers::google_oauth_callback(Extension(shared), Query(params)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    fn callback_identity() -> serde_json::Value {
        serde_json::json!({
            "sub": "g-999",
            "aud": "test_client_id",
            "email": "new.user@example.com",
            "email_verified": "true",
            "name": "New User",
            "picture": "https://lh3.example/p.jpg",
            "exp": "9999999999"
        })
    }

    #[tokio::test]
    async fn test_callback_creates_account_and_credential_atomically() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(
            hits.clone(),
            StatusCode::OK,
            serde_json::json!({
                "access_token": "cb-access",
                "refresh_token": "cb-refresh",
                "expires_in": 3600,
                "token_type": "Bearer",
                "id_token": "fake-id-token"
            }),
            Some(callback_identity()),
        )
        .await;
        let pool = setup_test_db().await;
        let state = test_state(pool, google_service(&base));
        let shared = Arc::new(RwLock::new(state.clone()));

        let mut params = HashMap::new();
        params.insert("code".to_string(), "one-time-code".to_string());
        params.insert("state".to_string(), "%2Fdashboard".to_string());

        handlers::google_oauth_callback(Extension(shared), Query(params))
            .await
            .expect("callback failed");

        let user: crate::auth::User =
            sqlx::query_as("SELECT * FROM users WHERE email = 'new.user@example.com'")
                .fetch_one(&state.db)
                .await
                .unwrap();
        assert!(user.id.starts_with("U_"));
        assert_eq!(user.role, "user");
        // Synthetic linking value, not a usable password hash.
        assert_eq!(user.password_hash.as_deref(), Some("oauth:g-999"));

        let account = store::find_by_user_id(&state.db, &user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.google_id, "g-999");
        assert_eq!(account.access_token.as_deref(), Some("cb-access"));
        assert_eq!(account.refresh_token.as_deref(), Some("cb-refresh"));
        assert!(account.expires_at_utc().unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_repeat_callback_preserves_refresh_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_provider(
            hits.clone(),
            StatusCode::OK,
            serde_json::json!({
                "access_token": "first-access",
                "refresh_token": "first-refresh",
                "expires_in": 3600,
                "token_type": "Bearer",
                "id_token": "fake-id-token"
            }),
            Some(callback_identity()),
        )
        .await;
        let pool = setup_test_db().await;
        let state = test_state(pool.clone(), google_service(&base));
        let shared = Arc::new(RwLock::new(state.clone()));

        let mut params = HashMap::new();
        params.insert("code".to_string(), "code-1".to_string());
        handlers::google_oauth_callback(Extension(shared), Query(params.clone()))
            .await
            .expect("first callback failed");

        // Repeat consent: the provider omits refresh_token this time.
        let base2 = spawn_provider(
            Arc::new(AtomicUsize::new(0)),
            StatusCode::OK,
            serde_json::json!({
                "access_token": "second-access",
                "expires_in": 3600,
                "token_type": "Bearer",
                "id_token": "fake-id-token"
            }),
            Some(callback_identity()),
        )
        .await;
        let state2 = test_state(pool, google_service(&base2));
        let shared2 = Arc::new(RwLock::new(state2.clone()));

        params.insert("code".to_string(), "code-2".to_string());
        handlers::google_oauth_callback(Extension(shared2), Query(params))
            .await
            .expect("second callback failed");

        let user: crate::auth::User =
            sqlx::query_as("SELECT * FROM users WHERE email = 'new.user@example.com'")
                .fetch_one(&state2.db)
                .await
                .unwrap();
        let account = store::find_by_user_id(&state2.db, &user.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(account.access_token.as_deref(), Some("second-access"));
        // The first consent's refresh token must not be nulled by the second.
        assert_eq!(account.refresh_token.as_deref(), Some("first-refresh"));
    }

    #[tokio::test]
    async fn test_callback_rejects_audience_mismatch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut identity = callback_identity();
        identity["aud"] = serde_json::json!("someone-elses-client");
        let base = spawn_provider(
            hits.clone(),
            StatusCode::OK,
            serde_json::json!({
                "access_token": "cb-access",
                "expires_in": 3600,
                "token_type": "Bearer",
                "id_token": "fake-id-token"
            }),
            Some(identity),
        )
        .await;
        let pool = setup_test_db().await;
        let state = test_state(pool, google_service(&base));
        let shared = Arc::new(RwLock::new(state.clone()));

        let mut params = HashMap::new();
        params.insert("code".to_string(), "one-time-code".to_string());

        let result = handlers::google_oauth_callback(Extension(shared), Query(params)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        // Nothing was committed.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
