//! Database layer (SQLite via sqlx).

pub mod sqlite;

pub use sqlite::Database;

/// Schema DDL, applied idempotently at connect time.
pub(crate) const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS Users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username VARCHAR(50) UNIQUE NOT NULL,
        password_hash VARCHAR(128) NOT NULL,
        strava_athlete_id INTEGER UNIQUE,
        strava_access_token TEXT,
        strava_refresh_token TEXT,
        token_expiration INTEGER,
        last_sync_time INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS Athletes (
        user_id INTEGER PRIMARY KEY,
        first_name VARCHAR(50),
        last_name VARCHAR(50),
        gender TEXT NOT NULL CHECK(gender IN ('M', 'F', 'O')) DEFAULT 'O',
        mileage_goal REAL,
        long_run_goal REAL,
        FOREIGN KEY (user_id) REFERENCES Users(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS DailyMileage (
        activity_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        strava_activity_id INTEGER NOT NULL,
        date DATE NOT NULL,
        distance REAL NOT NULL,
        activity_title VARCHAR(100),
        FOREIGN KEY (user_id) REFERENCES Users(id),
        UNIQUE (user_id, strava_activity_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_daily_mileage_user_date ON DailyMileage (user_id, date)",
];
