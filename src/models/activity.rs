// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Synced running activity model.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;

/// Meters in one statute mile, as used for unit conversion on sync.
pub const METERS_PER_MILE: f64 = 1609.34;

/// Stored activity record (row of `DailyMileage`).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Activity {
    /// Local row ID (insertion order)
    pub activity_id: i64,
    /// Owning user
    pub user_id: i64,
    /// Strava activity ID (unique per user)
    pub strava_activity_id: i64,
    /// Local calendar date the activity started
    pub date: NaiveDate,
    /// Distance in miles
    pub distance: f64,
    /// Activity name/title
    #[serde(rename = "title")]
    pub activity_title: Option<String>,
}

/// Convert meters to miles, rounded to two decimals.
pub fn meters_to_miles(meters: f64) -> f64 {
    (meters / METERS_PER_MILE * 100.0).round() / 100.0
}
