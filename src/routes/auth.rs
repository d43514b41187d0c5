// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account and Strava OAuth authentication routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, expired_session_cookie, session_cookie, AuthUser};
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// How long a Strava authorization round trip may take.
const OAUTH_STATE_MAX_AGE_SECS: u64 = 10 * 60;

/// Public account routes (no session required).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

/// Strava linking routes. Mounted behind `require_auth` in routes/mod.rs.
pub fn strava_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/strava", get(strava_start))
        .route("/auth/strava/callback", get(strava_callback))
}

// ─── Registration / Login ────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(range(min = 0.0, max = 10000.0))]
    pub mileage_goal: f64,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub long_run_goal: f64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: i64,
    pub username: String,
}

fn cookie_secure(state: &AppState) -> bool {
    state.config.frontend_url.starts_with("https://")
}

fn start_session(state: &AppState, jar: CookieJar, user_id: i64) -> Result<CookieJar> {
    let jwt = create_jwt(user_id, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;
    Ok(jar.add(session_cookie(jwt, cookie_secure(state))))
}

/// Register a new account with initial goals and log it in.
async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionResponse>)> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user_id = state
        .db
        .register_user(&req.username, &req.password, req.mileage_goal, req.long_run_goal)
        .await?;

    let jar = start_session(&state, jar, user_id)?;

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            user_id,
            username: req.username,
        }),
    ))
}

/// Log in with username and password.
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    if !state.db.validate_password(&req.username, &req.password).await? {
        tracing::info!(username = %req.username, "Login failed");
        return Err(AppError::InvalidCredentials);
    }

    let user = state
        .db
        .get_user_by_username(&req.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    tracing::info!(user_id = user.id, "Login successful");
    let jar = start_session(&state, jar, user.id)?;

    Ok((
        jar,
        Json(SessionResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

/// Clear the session cookie.
async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (jar.remove(expired_session_cookie()), StatusCode::NO_CONTENT)
}

// ─── Strava OAuth ────────────────────────────────────────────

/// Callback URL Strava redirects back to, derived from the request host.
fn callback_url(headers: &axum::http::HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost:8080");

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };

    format!("{}://{}/auth/strava/callback", scheme, host)
}

/// Start OAuth flow - redirect to Strava authorization.
async fn strava_start(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: axum::http::HeaderMap,
) -> Result<Redirect> {
    let oauth_state = sign_state(user.user_id, now_secs()?, &state.config.oauth_state_key)?;
    let auth_url = state
        .strava_service
        .client()
        .authorize_url(&callback_url(&headers), &oauth_state);

    tracing::info!(user_id = user.user_id, "Starting OAuth flow, redirecting to Strava");
    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange code for tokens and link the account.
async fn strava_callback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let state_user = verify_state(&params.state, now_secs()?, &state.config.oauth_state_key)
        .ok_or_else(|| AppError::BadRequest("Invalid or expired OAuth state".to_string()))?;

    if state_user != user.user_id {
        tracing::warn!(
            user_id = user.user_id,
            state_user,
            "OAuth state issued to a different user"
        );
        return Err(AppError::BadRequest("OAuth state does not match session".to_string()));
    }

    let frontend_url = &state.config.frontend_url;

    if let Some(error) = params.error {
        tracing::warn!(error = %error, user_id = user.user_id, "OAuth error from Strava");
        let redirect = format!("{}?strava_error={}", frontend_url, urlencoding::encode(&error));
        return Ok(Redirect::temporary(&redirect));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".to_string()))?;

    state
        .strava_service
        .authorize_and_save_user(&code, user.user_id)
        .await?;

    Ok(Redirect::temporary(&format!("{}?strava=connected", frontend_url)))
}

fn now_secs() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))
}

/// Build the OAuth `state` value: base64url("user_id|issued_hex|signature_hex").
pub fn sign_state(user_id: i64, issued_at: u64, secret: &[u8]) -> Result<String> {
    let payload = format!("{}|{:x}", user_id, issued_at);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
}

/// Verify the signature and age of an OAuth `state` value and return its user ID.
pub fn verify_state(state: &str, now: u64, secret: &[u8]) -> Option<i64> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    let parts: Vec<&str> = state_str.splitn(3, '|').collect();
    let &[user_id, issued_hex, signature_hex] = parts.as_slice() else {
        return None;
    };

    let payload = format!("{}|{}", user_id, issued_hex);
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !bool::from(expected.as_bytes().ct_eq(signature_hex.as_bytes())) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let issued_at = u64::from_str_radix(issued_hex, 16).ok()?;
    if now.saturating_sub(issued_at) > OAUTH_STATE_MAX_AGE_SECS {
        tracing::warn!(issued_at, "OAuth state expired");
        return None;
    }

    user_id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"secret_key";
    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_state_roundtrip() {
        let state = sign_state(55, NOW, SECRET).unwrap();
        assert_eq!(verify_state(&state, NOW + 5, SECRET), Some(55));
    }

    #[test]
    fn test_state_is_url_safe() {
        let state = sign_state(55, NOW, SECRET).unwrap();
        assert!(!state.contains('+'));
        assert!(!state.contains('/'));
        assert!(!state.contains('='));
    }

    #[test]
    fn test_state_wrong_secret() {
        let state = sign_state(55, NOW, SECRET).unwrap();
        assert_eq!(verify_state(&state, NOW, b"wrong_key"), None);
    }

    #[test]
    fn test_state_tampered_user() {
        let state = sign_state(55, NOW, SECRET).unwrap();
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&state).unwrap()).unwrap();
        let forged = URL_SAFE_NO_PAD.encode(decoded.replacen("55|", "56|", 1));
        assert_eq!(verify_state(&forged, NOW, SECRET), None);
    }

    #[test]
    fn test_state_expired() {
        let state = sign_state(55, NOW, SECRET).unwrap();
        assert_eq!(
            verify_state(&state, NOW + OAUTH_STATE_MAX_AGE_SECS + 1, SECRET),
            None
        );
    }

    #[test]
    fn test_state_malformed() {
        let encoded = URL_SAFE_NO_PAD.encode("invalid|format");
        assert_eq!(verify_state(&encoded, NOW, SECRET), None);
        assert_eq!(verify_state("not base64!!", NOW, SECRET), None);
    }

    #[test]
    fn test_register_request_validation() {
        let req = RegisterRequest {
            username: "ab".to_string(),
            password: "password123".to_string(),
            mileage_goal: 100.0,
            long_run_goal: 20.0,
        };
        assert!(req.validate().is_err());

        let req = RegisterRequest {
            username: "runner".to_string(),
            password: "password123".to_string(),
            mileage_goal: -1.0,
            long_run_goal: 20.0,
        };
        assert!(req.validate().is_err());

        let req = RegisterRequest {
            username: "runner".to_string(),
            password: "password123".to_string(),
            mileage_goal: 100.0,
            long_run_goal: 20.0,
        };
        assert!(req.validate().is_ok());
    }
}
