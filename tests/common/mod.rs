// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use mileage_tracker::config::Config;
use mileage_tracker::db::Database;
use mileage_tracker::routes::create_router;
use mileage_tracker::services::{StravaClient, StravaService};
use mileage_tracker::AppState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Athlete ID the fake Strava server hands out on code exchange.
#[allow(dead_code)]
pub const FAKE_ATHLETE_ID: i64 = 9001;

#[allow(dead_code)]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Create a test app backed by a fresh in-memory database.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub async fn create_test_app() -> (Router, Arc<AppState>) {
    create_test_app_with_config(Config::test_default()).await
}

#[allow(dead_code)]
pub async fn create_test_app_with_config(config: Config) -> (Router, Arc<AppState>) {
    let db = Database::in_memory()
        .await
        .expect("in-memory database should open");
    let strava_service = StravaService::from_config(&config, db.clone()).unwrap();

    let state = Arc::new(AppState {
        config,
        db,
        strava_service,
    });

    (create_router(state.clone()), state)
}

/// Create a session JWT the way the login handler does.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: i64, signing_key: &[u8]) -> String {
    mileage_tracker::middleware::auth::create_jwt(user_id, signing_key).unwrap()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ─── Fake Strava ─────────────────────────────────────────────

/// Knobs and counters shared with the fake Strava handlers.
#[derive(Default)]
pub struct FakeStravaState {
    pub refresh_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub rate_limited: AtomicBool,
    /// List calls answer 401, as for a token the athlete revoked
    pub revoked: AtomicBool,
    /// Activities served, filtered by `after` and paged by `page`/`per_page`
    pub activities: Mutex<Vec<Value>>,
    /// `after` query value of the most recent list call
    pub last_after: Mutex<Option<i64>>,
    /// Bearer token of the most recent list call
    pub last_bearer: Mutex<Option<String>>,
}

/// A local HTTP server speaking enough of the Strava API for sync tests.
pub struct FakeStrava {
    pub base_url: String,
    pub state: Arc<FakeStravaState>,
}

#[allow(dead_code)]
impl FakeStrava {
    pub async fn spawn() -> Self {
        let state = Arc::new(FakeStravaState::default());

        let app = Router::new()
            .route("/oauth/token", post(fake_token))
            .route("/api/v3/athlete/activities", get(fake_activities))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn api_url(&self) -> String {
        format!("{}/api/v3", self.base_url)
    }

    pub fn oauth_url(&self) -> String {
        format!("{}/oauth", self.base_url)
    }

    pub fn client(&self) -> StravaClient {
        StravaClient::with_base_urls(
            "test_client_id".to_string(),
            "test_secret".to_string(),
            self.api_url(),
            self.oauth_url(),
        )
        .unwrap()
    }

    /// App config pointing at this server.
    pub fn config(&self) -> Config {
        Config {
            strava_api_url: self.api_url(),
            strava_oauth_url: self.oauth_url(),
            ..Config::test_default()
        }
    }

    pub fn revoke(&self) {
        self.state.revoked.store(true, Ordering::SeqCst);
    }

    pub fn set_activities(&self, activities: Vec<Value>) {
        *self.state.activities.lock().unwrap() = activities;
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn last_after(&self) -> Option<i64> {
        *self.state.last_after.lock().unwrap()
    }

    pub fn last_bearer(&self) -> Option<String> {
        self.state.last_bearer.lock().unwrap().clone()
    }
}

async fn fake_token(
    State(state): State<Arc<FakeStravaState>>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let grant = params.get("grant_type").map(String::as_str);

    match grant {
        Some("refresh_token") => {
            state.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if state.fail_refresh.load(Ordering::SeqCst) {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"message": "Bad Request", "errors": [{"code": "invalid_grant"}]})),
                )
                    .into_response();
            }
            Json(json!({
                "token_type": "Bearer",
                "access_token": "refreshed_access",
                "refresh_token": "refreshed_refresh",
                "expires_at": now_secs() + 21600,
                "expires_in": 21600
            }))
            .into_response()
        }
        Some("authorization_code") => {
            state.exchange_calls.fetch_add(1, Ordering::SeqCst);
            if params.get("code").map(String::as_str) != Some("good_code") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"message": "Bad Request", "errors": [{"code": "invalid"}]})),
                )
                    .into_response();
            }
            Json(json!({
                "token_type": "Bearer",
                "access_token": "linked_access",
                "refresh_token": "linked_refresh",
                "expires_at": now_secs() + 21600,
                "athlete": {
                    "id": FAKE_ATHLETE_ID,
                    "firstname": "Pat",
                    "lastname": "Runner",
                    "sex": "F"
                }
            }))
            .into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn fake_activities(
    State(state): State<Arc<FakeStravaState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.list_calls.fetch_add(1, Ordering::SeqCst);

    if state.rate_limited.load(Ordering::SeqCst) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);
    if bearer.is_none() || state.revoked.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Authorization Error", "errors": [{"code": "invalid"}]})),
        )
            .into_response();
    }
    *state.last_bearer.lock().unwrap() = bearer;

    let after: Option<i64> = params.get("after").and_then(|a| a.parse().ok());
    *state.last_after.lock().unwrap() = after;

    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: usize = params
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(30);

    // Items without a UTC start are always served.
    let after = after.unwrap_or(0);
    let matching: Vec<Value> = state
        .activities
        .lock()
        .unwrap()
        .iter()
        .filter(|item| start_epoch(item).is_none_or(|ts| ts > after))
        .cloned()
        .collect();

    let page_items: Vec<Value> = matching
        .into_iter()
        .skip(page.saturating_sub(1) * per_page)
        .take(per_page)
        .collect();
    Json(page_items).into_response()
}

fn start_epoch(item: &Value) -> Option<i64> {
    let start = item.get("start_date")?.as_str()?;
    Some(chrono::DateTime::parse_from_rfc3339(start).ok()?.timestamp())
}
