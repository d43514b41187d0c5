// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite database wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (registration, credentials, Strava tokens, sync time)
//! - Athletes (profile and mileage goals)
//! - DailyMileage (synced activities, deduplicated per user)
//!
//! Every operation borrows a pooled connection for a single statement (or one
//! short transaction); the connection goes back to the pool when the future
//! completes, on success and on error alike.

use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::db::SCHEMA;
use crate::error::AppError;
use crate::models::{Activity, Athlete, Gender, User, UserTokens};
use crate::services::password as passwords;

const MAX_CONNECTIONS: u32 = 5;

/// Database handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let in_memory = url.contains(":memory:");

        let mut opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives only as long as its connection, so keep
        // exactly one connection open for the lifetime of the pool.
        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
        };

        let pool = pool_opts
            .connect_with(opts)
            .await
            .map_err(|e| AppError::Database(format!("Failed to open {}: {}", url, e)))?;

        let db = Self { pool };
        db.migrate().await?;

        tracing::info!(url, "Connected to database");
        Ok(db)
    }

    /// Fresh private in-memory database (for tests and local experiments).
    pub async fn in_memory() -> Result<Self, AppError> {
        Self::connect("sqlite::memory:").await
    }

    /// Create tables and indexes if they do not exist yet.
    async fn migrate(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the database answers a trivial query.
    pub async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "Database ping failed");
                false
            }
        }
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Create a new user and return its ID.
    ///
    /// The UNIQUE constraint on `username` is the only duplicate check, so two
    /// racing registrations for the same name yield one row and one
    /// `DuplicateUser`.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<i64, AppError> {
        let password_hash = passwords::hash(password).await?;

        let mut tx = self.pool.begin().await?;
        let user_id = insert_user(&mut tx, username, &password_hash).await?;
        tx.commit().await?;

        tracing::info!(user_id, username, "User created");
        Ok(user_id)
    }

    /// Create a user together with its athlete goals, atomically.
    pub async fn register_user(
        &self,
        username: &str,
        password: &str,
        mileage_goal: f64,
        long_run_goal: f64,
    ) -> Result<i64, AppError> {
        let password_hash = passwords::hash(password).await?;

        let mut tx = self.pool.begin().await?;

        let user_id = insert_user(&mut tx, username, &password_hash).await?;

        sqlx::query(
            "INSERT INTO Athletes (user_id, mileage_goal, long_run_goal) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(mileage_goal)
        .bind(long_run_goal)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(user_id, username, "User registered with goals");
        Ok(user_id)
    }

    /// Get a user by ID.
    pub async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM Users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Get a user by username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM Users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Whether a username is taken.
    pub async fn user_exists(&self, username: &str) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM Users WHERE username = ?)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Check a username/password pair.
    ///
    /// Returns `false` for an unknown user and for a wrong password alike, and
    /// both cost one Argon2 verification.
    pub async fn validate_password(&self, username: &str, password: &str) -> Result<bool, AppError> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT password_hash FROM Users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        passwords::verify(password, hash).await
    }

    /// Whether the user has stored Strava credentials.
    pub async fn user_has_strava(&self, user_id: i64) -> Result<bool, AppError> {
        let token: Option<Option<String>> =
            sqlx::query_scalar("SELECT strava_access_token FROM Users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(matches!(token, Some(Some(_))))
    }

    // ─── Token Operations ────────────────────────────────────────

    /// Get Strava tokens for a user, or `None` if the user does not exist.
    pub async fn get_user_tokens(&self, user_id: i64) -> Result<Option<UserTokens>, AppError> {
        let tokens = sqlx::query_as::<_, UserTokens>(
            r#"
            SELECT strava_access_token AS access_token,
                   strava_refresh_token AS refresh_token,
                   token_expiration AS expires_at
            FROM Users
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tokens)
    }

    /// Replace the stored tokens after a refresh.
    pub async fn update_tokens(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE Users
            SET strava_access_token = ?, strava_refresh_token = ?, token_expiration = ?
            WHERE id = ?
            "#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }

    /// Link a Strava account and store its first set of tokens.
    pub async fn save_tokens_and_account(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
        strava_athlete_id: i64,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE Users
            SET strava_athlete_id = ?,
                strava_access_token = ?,
                strava_refresh_token = ?,
                token_expiration = ?
            WHERE id = ?
            "#,
        )
        .bind(strava_athlete_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::BadRequest(format!(
                    "Strava athlete {} is already linked to another user",
                    strava_athlete_id
                ))
            } else {
                e.into()
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }

    /// Forget the Strava link and its tokens, e.g. after the user revoked access.
    ///
    /// Stored activities and the last-sync time are kept.
    pub async fn clear_strava_link(&self, user_id: i64) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE Users
            SET strava_athlete_id = NULL,
                strava_access_token = NULL,
                strava_refresh_token = NULL,
                token_expiration = NULL
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        tracing::info!(user_id, "Strava link cleared");
        Ok(())
    }

    // ─── Sync Time ───────────────────────────────────────────────

    /// Record that a sync just completed.
    pub async fn update_last_sync_time(&self, user_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE Users SET last_sync_time = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the sync cursor to an explicit time, used when a sync stopped early.
    pub async fn set_last_sync_time(&self, user_id: i64, ts: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE Users SET last_sync_time = ? WHERE id = ?")
            .bind(ts)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Last sync time (Unix seconds), or `None` if the user does not exist.
    pub async fn get_last_sync_time(&self, user_id: i64) -> Result<Option<i64>, AppError> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT last_sync_time FROM Users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ts)
    }

    // ─── Athlete Operations ──────────────────────────────────────

    /// Create (or overwrite) both goals for a user.
    pub async fn create_athlete_with_goals(
        &self,
        user_id: i64,
        mileage_goal: f64,
        long_run_goal: f64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO Athletes (user_id, mileage_goal, long_run_goal)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                mileage_goal = excluded.mileage_goal,
                long_run_goal = excluded.long_run_goal
            "#,
        )
        .bind(user_id)
        .bind(mileage_goal)
        .bind(long_run_goal)
        .execute(&self.pool)
        .await
        .map_err(|e| missing_user(e, user_id))?;
        Ok(())
    }

    /// Set the mileage goal, creating the athlete row if needed.
    pub async fn set_mileage_goal(&self, user_id: i64, goal: f64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO Athletes (user_id, mileage_goal) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET mileage_goal = excluded.mileage_goal
            "#,
        )
        .bind(user_id)
        .bind(goal)
        .execute(&self.pool)
        .await
        .map_err(|e| missing_user(e, user_id))?;
        Ok(())
    }

    /// Set the long-run goal, creating the athlete row if needed.
    pub async fn set_long_run_goal(&self, user_id: i64, goal: f64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO Athletes (user_id, long_run_goal) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET long_run_goal = excluded.long_run_goal
            "#,
        )
        .bind(user_id)
        .bind(goal)
        .execute(&self.pool)
        .await
        .map_err(|e| missing_user(e, user_id))?;
        Ok(())
    }

    /// Store the athlete's name and gender from their Strava profile.
    pub async fn update_athlete_profile(
        &self,
        user_id: i64,
        first_name: &str,
        last_name: &str,
        gender: Gender,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO Athletes (user_id, first_name, last_name, gender) VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                gender = excluded.gender
            "#,
        )
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .bind(gender.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| missing_user(e, user_id))?;
        Ok(())
    }

    /// Get the athlete row for a user.
    pub async fn get_athlete(&self, user_id: i64) -> Result<Option<Athlete>, AppError> {
        let athlete = sqlx::query_as::<_, Athlete>("SELECT * FROM Athletes WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(athlete)
    }

    // ─── Activity Operations ─────────────────────────────────────

    /// Insert an activity unless `(user_id, strava_activity_id)` already exists.
    ///
    /// Returns `true` if a row was inserted, `false` for a duplicate.
    pub async fn create_activity(
        &self,
        user_id: i64,
        date: NaiveDate,
        distance: f64,
        strava_activity_id: i64,
        title: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO DailyMileage (user_id, strava_activity_id, date, distance, activity_title)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, strava_activity_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(strava_activity_id)
        .bind(date)
        .bind(distance)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(|e| missing_user(e, user_id))?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            tracing::debug!(user_id, strava_activity_id, "Activity already stored");
        }
        Ok(inserted)
    }

    /// All activities for a user, newest date first (ties: latest insert first).
    pub async fn get_activities_for_user(&self, user_id: i64) -> Result<Vec<Activity>, AppError> {
        let activities = sqlx::query_as::<_, Activity>(
            r#"
            SELECT activity_id, user_id, strava_activity_id, date, distance, activity_title
            FROM DailyMileage
            WHERE user_id = ?
            ORDER BY date DESC, activity_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }
}

/// Insert a user row inside an open transaction.
async fn insert_user(
    tx: &mut Transaction<'_, Sqlite>,
    username: &str,
    password_hash: &str,
) -> Result<i64, AppError> {
    let result = sqlx::query("INSERT INTO Users (username, password_hash) VALUES (?, ?)")
        .bind(username)
        .bind(password_hash)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                tracing::info!(username, "Registration rejected, username taken");
                AppError::DuplicateUser(username.to_string())
            } else {
                e.into()
            }
        })?;

    Ok(result.last_insert_rowid())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Map a foreign-key failure on `user_id` to `NotFound`.
fn missing_user(err: sqlx::Error, user_id: i64) -> AppError {
    let fk_violation = err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_foreign_key_violation());
    if fk_violation {
        AppError::NotFound(format!("User {}", user_id))
    } else {
        err.into()
    }
}
