//! User model for storage.

use sqlx::FromRow;

/// Row of the `Users` table.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    /// Unique login name
    pub username: String,
    /// Argon2 PHC string
    pub password_hash: String,
    /// Linked Strava athlete ID, if the user connected Strava
    pub strava_athlete_id: Option<i64>,
    pub strava_access_token: Option<String>,
    pub strava_refresh_token: Option<String>,
    /// Access token expiry (Unix seconds)
    pub token_expiration: Option<i64>,
    /// Last successful Strava sync (Unix seconds, 0 = never)
    pub last_sync_time: i64,
}

impl User {
    /// Whether the user has stored Strava credentials.
    pub fn has_strava(&self) -> bool {
        self.strava_access_token.is_some()
    }
}

/// User's Strava OAuth tokens. Each field is `None` until first set.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// When the access token expires (Unix seconds)
    pub expires_at: Option<i64>,
}
