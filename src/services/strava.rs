// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client and activity sync.
//!
//! Handles:
//! - OAuth authorization-code exchange and account linking
//! - Token refresh when expired
//! - Activity listing, unit conversion and idempotent storage
//! - Rate limit detection

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::models::activity::meters_to_miles;
use crate::models::Gender;

/// Production Strava REST API base URL.
pub const DEFAULT_API_URL: &str = "https://www.strava.com/api/v3";
/// Production Strava OAuth base URL.
pub const DEFAULT_OAUTH_URL: &str = "https://www.strava.com/oauth";
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Activities requested per page (Strava maximum is 200).
const ACTIVITIES_PER_PAGE: u32 = 100;
/// Upper bound on pages fetched in a single sync.
const MAX_SYNC_PAGES: u32 = 10;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    api_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Result<Self, AppError> {
        Self::with_base_urls(
            client_id,
            client_secret,
            DEFAULT_API_URL.to_string(),
            DEFAULT_OAUTH_URL.to_string(),
        )
    }

    /// Create a client that talks to the given API and OAuth base URLs.
    pub fn with_base_urls(
        client_id: String,
        client_secret: String,
        api_url: String,
        oauth_url: String,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            oauth_url: oauth_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        })
    }

    /// URL of the Strava consent page the user is redirected to.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/authorize?\
             client_id={}&\
             redirect_uri={}&\
             response_type=code&\
             approval_prompt=auto&\
             scope=read,activity:read_all&\
             state={}",
            self.oauth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    /// Exchange an authorization code for tokens and the athlete profile.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchangeResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(format!("Token exchange failed: {}", e)))?;

        self.check_response_json(response).await
    }

    /// Refresh an expired access token.
    ///
    /// A 400 or 401 from the token endpoint means the refresh token was
    /// revoked and maps to [`AppError::STRAVA_TOKEN_ERROR`].
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(format!("Token refresh request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Strava rejected refresh token");
            return Err(AppError::StravaApi(
                AppError::STRAVA_TOKEN_ERROR.to_string(),
            ));
        }

        self.check_response_json(response).await
    }

    /// List the athlete's activities started after `after` (Unix seconds).
    ///
    /// Items are returned as raw JSON so that one malformed entry does not
    /// spoil the whole page.
    pub async fn list_activities(
        &self,
        access_token: &str,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<serde_json::Value>, AppError> {
        let url = format!("{}/athlete/activities", self.api_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("after", after.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::StravaApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                tracing::warn!("Strava rate limit hit (429)");
                return Err(AppError::StravaApi(AppError::STRAVA_RATE_LIMIT.to_string()));
            }

            if status.as_u16() == 401 {
                return Err(AppError::StravaApi(
                    AppError::STRAVA_TOKEN_ERROR.to_string(),
                ));
            }

            tracing::error!(status = %status, body = %body, "Strava request failed");
            return Err(AppError::StravaApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::StravaApi(format!("JSON parse error: {}", e)))
    }
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Token exchange response from Strava OAuth (includes athlete info).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub athlete: StravaAthlete,
}

/// Athlete info from OAuth token exchange.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StravaAthlete {
    pub id: u64,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
}

/// Summary activity as returned by the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// Distance in meters
    pub distance: f64,
    /// Local start time, e.g. `2023-10-27T08:00:00Z`
    pub start_date_local: String,
    /// UTC start time (RFC 3339)
    #[serde(default)]
    pub start_date: Option<String>,
}

impl StravaActivitySummary {
    /// Calendar date of the local start time.
    pub fn local_date(&self) -> Option<NaiveDate> {
        let date = self.start_date_local.get(..10)?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }

    /// UTC start time in Unix seconds.
    pub fn started_at(&self) -> Option<i64> {
        let ts = DateTime::parse_from_rfc3339(self.start_date.as_deref()?).ok()?;
        Some(ts.timestamp())
    }
}

/// Counts from one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Items returned by Strava
    pub fetched: u32,
    /// New rows written
    pub inserted: u32,
    /// Items already stored
    pub duplicates: u32,
    /// Malformed items ignored
    pub skipped: u32,
    /// The page limit was reached with a full page, so Strava has more
    pub more_pending: bool,
    /// Where the next sync resumes (Unix seconds) when `more_pending` is set
    #[serde(skip)]
    pub resume_after: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

/// High-level Strava service that manages token lifecycle and sync.
///
/// Holds no per-user state: tokens and sync time are re-read from the
/// database on every call.
#[derive(Clone)]
pub struct StravaService {
    client: StravaClient,
    db: Database,
}

impl StravaService {
    pub fn new(client: StravaClient, db: Database) -> Self {
        Self { client, db }
    }

    /// Build the service from application config.
    pub fn from_config(config: &Config, db: Database) -> Result<Self, AppError> {
        let client = StravaClient::with_base_urls(
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
            config.strava_api_url.clone(),
            config.strava_oauth_url.clone(),
        )?;
        Ok(Self::new(client, db))
    }

    /// The underlying HTTP client.
    pub fn client(&self) -> &StravaClient {
        &self.client
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given user.
    ///
    /// If the stored token has expired (`expires_at <= now`), it is exchanged
    /// for a new one and the new tokens are persisted before returning.
    pub async fn get_valid_access_token(&self, user_id: i64) -> Result<String, AppError> {
        let tokens = self
            .db
            .get_user_tokens(user_id)
            .await?
            .ok_or(AppError::NoLinkedAccount(user_id))?;

        let access_token = tokens
            .access_token
            .ok_or(AppError::NoLinkedAccount(user_id))?;

        // A missing expiry is treated as already expired.
        let expires_at = tokens.expires_at.unwrap_or(0);
        if expires_at > Utc::now().timestamp() {
            return Ok(access_token);
        }

        tracing::info!(user_id, expires_at, "Access token expired, refreshing");

        let refresh_token = tokens
            .refresh_token
            .ok_or(AppError::NoLinkedAccount(user_id))?;

        let new_tokens = self
            .client
            .refresh_token(&refresh_token)
            .await
            .inspect_err(|e| tracing::warn!(user_id, error = %e, "Token refresh failed"))?;

        self.db
            .update_tokens(
                user_id,
                &new_tokens.access_token,
                &new_tokens.refresh_token,
                new_tokens.expires_at,
            )
            .await?;

        tracing::info!(user_id, expires_at = new_tokens.expires_at, "Token refreshed");
        Ok(new_tokens.access_token)
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Exchange an authorization code and link the Strava account to `user_id`.
    ///
    /// Returns the linked athlete.
    pub async fn authorize_and_save_user(
        &self,
        code: &str,
        user_id: i64,
    ) -> Result<StravaAthlete, AppError> {
        let token_response = self.client.exchange_code(code).await?;
        let athlete = token_response.athlete;

        let athlete_id = i64::try_from(athlete.id).map_err(|_| {
            AppError::StravaApi(format!("Athlete ID out of range: {}", athlete.id))
        })?;

        self.db
            .save_tokens_and_account(
                user_id,
                &token_response.access_token,
                &token_response.refresh_token,
                token_response.expires_at,
                athlete_id,
            )
            .await?;

        if let Err(e) = self
            .db
            .update_athlete_profile(
                user_id,
                athlete.firstname.as_deref().unwrap_or_default(),
                athlete.lastname.as_deref().unwrap_or_default(),
                Gender::from_strava(athlete.sex.as_deref()),
            )
            .await
        {
            tracing::warn!(error = %e, user_id, "Failed to store athlete profile, continuing anyway");
        }

        tracing::info!(user_id, athlete_id, "Strava account linked");
        Ok(athlete)
    }

    // ─── Sync ────────────────────────────────────────────────────────────────

    /// Fetch activities since the last sync and store any not already present.
    ///
    /// Each insert commits on its own; duplicates are absorbed by
    /// `create_activity`, so re-running after a partial failure is safe.
    ///
    /// At most `MAX_SYNC_PAGES` pages are read. If the last of them is full,
    /// `more_pending` is set and `resume_after` holds the newest start time
    /// seen, minus one second so that a tie at the boundary is re-fetched.
    pub async fn fetch_and_save_user_data(&self, user_id: i64) -> Result<SyncSummary, AppError> {
        let access_token = self.get_valid_access_token(user_id).await?;
        let after = self.db.get_last_sync_time(user_id).await?.unwrap_or(0);

        let mut summary = SyncSummary::default();
        let mut newest_start: Option<i64> = None;

        for page in 1..=MAX_SYNC_PAGES {
            let items = self
                .client
                .list_activities(&access_token, after, page, ACTIVITIES_PER_PAGE)
                .await?;
            let page_len = items.len();

            for item in items {
                summary.fetched += 1;

                let Some((strava_id, date, miles, activity)) = parse_activity(item) else {
                    summary.skipped += 1;
                    continue;
                };

                let inserted = self
                    .db
                    .create_activity(user_id, date, miles, strava_id, activity.name.as_deref())
                    .await?;
                newest_start = newest_start.max(activity.started_at());

                if inserted {
                    summary.inserted += 1;
                } else {
                    summary.duplicates += 1;
                }
            }

            if page_len < ACTIVITIES_PER_PAGE as usize {
                break;
            }
            if page == MAX_SYNC_PAGES {
                summary.more_pending = true;
                summary.resume_after = newest_start.map(|ts| ts - 1);
            }
        }

        tracing::info!(
            user_id,
            after,
            fetched = summary.fetched,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            more_pending = summary.more_pending,
            "Strava sync complete"
        );
        Ok(summary)
    }

    /// Sync the user if they have a linked account and the last sync is older
    /// than `interval_secs`.
    ///
    /// The last-sync time only advances when the whole sync succeeds. When
    /// the sync stopped at the page limit it advances to the resume point
    /// instead of now. A revoked token clears the Strava link.
    pub async fn sync_if_stale(
        &self,
        user_id: i64,
        interval_secs: i64,
    ) -> Result<Option<SyncSummary>, AppError> {
        let user = self
            .db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        if !user.has_strava() {
            return Ok(None);
        }

        let age = Utc::now().timestamp() - user.last_sync_time;
        if age < interval_secs {
            tracing::debug!(user_id, age, "Sync not due");
            return Ok(None);
        }

        let summary = match self.fetch_and_save_user_data(user_id).await {
            Ok(summary) => summary,
            Err(e) if e.is_strava_token_error() => {
                tracing::warn!(user_id, error = %e, "Strava token revoked, unlinking account");
                self.db.clear_strava_link(user_id).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match (summary.more_pending, summary.resume_after) {
            (true, Some(resume_after)) => {
                tracing::info!(user_id, resume_after, "Sync hit page limit, resuming next time");
                self.db.set_last_sync_time(user_id, resume_after).await?;
            }
            (true, None) => {
                tracing::warn!(
                    user_id,
                    "Sync hit page limit without start times, later items may be missed"
                );
                self.db.update_last_sync_time(user_id).await?;
            }
            (false, _) => self.db.update_last_sync_time(user_id).await?,
        }
        Ok(Some(summary))
    }
}

/// Decode one list item into `(strava_id, date, miles, summary)`.
fn parse_activity(
    item: serde_json::Value,
) -> Option<(i64, NaiveDate, f64, StravaActivitySummary)> {
    let activity: StravaActivitySummary = match serde_json::from_value(item) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed Strava activity");
            return None;
        }
    };

    let Some(date) = activity.local_date() else {
        tracing::warn!(
            activity_id = activity.id,
            start_date_local = %activity.start_date_local,
            "Skipping activity with unparseable start date"
        );
        return None;
    };

    let strava_id = i64::try_from(activity.id).ok()?;
    let miles = meters_to_miles(activity.distance);
    Some((strava_id, date, miles, activity))
}
