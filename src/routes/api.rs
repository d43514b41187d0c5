// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Activity, Athlete};
use crate::services::SyncSummary;
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/activities", get(get_activities))
        .route("/api/goals", put(update_goals))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
pub struct UserResponse {
    pub user_id: i64,
    pub username: String,
    pub has_strava: bool,
    /// Unix seconds, 0 if never synced
    pub last_sync_time: i64,
    pub athlete: Option<Athlete>,
}

/// Get current user profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let profile = state
        .db
        .get_user_by_id(user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.user_id)))?;

    let athlete = state.db.get_athlete(user.user_id).await?;

    Ok(Json(UserResponse {
        user_id: profile.id,
        has_strava: profile.has_strava(),
        username: profile.username,
        last_sync_time: profile.last_sync_time,
        athlete,
    }))
}

// ─── Activities ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct ActivitiesResponse {
    pub mileage_goal: Option<f64>,
    pub long_run_goal: Option<f64>,
    pub activities: Vec<Activity>,
    pub has_strava: bool,
    /// Result of the sync run triggered by this request, if one ran.
    pub sync: Option<SyncSummary>,
}

/// Get goals and activities, syncing from Strava first if the data is stale.
///
/// A failed sync is logged and the stored data is returned anyway.
async fn get_activities(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ActivitiesResponse>> {
    let sync = match state
        .strava_service
        .sync_if_stale(user.user_id, state.config.sync_interval_secs)
        .await
    {
        Ok(summary) => summary,
        Err(e @ AppError::NotFound(_)) => return Err(e),
        Err(e) => {
            tracing::warn!(user_id = user.user_id, error = %e, "Strava sync failed");
            None
        }
    };

    let athlete = state.db.get_athlete(user.user_id).await?;
    let activities = state.db.get_activities_for_user(user.user_id).await?;
    let has_strava = state.db.user_has_strava(user.user_id).await?;

    tracing::debug!(
        user_id = user.user_id,
        count = activities.len(),
        synced = sync.is_some(),
        "Fetched activities"
    );

    Ok(Json(ActivitiesResponse {
        mileage_goal: athlete.as_ref().and_then(|a| a.mileage_goal),
        long_run_goal: athlete.as_ref().and_then(|a| a.long_run_goal),
        activities,
        has_strava,
        sync,
    }))
}

// ─── Goals ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct GoalsRequest {
    #[validate(range(min = 0.0, max = 10000.0))]
    pub mileage_goal: Option<f64>,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub long_run_goal: Option<f64>,
}

#[derive(Serialize)]
pub struct GoalsResponse {
    pub mileage_goal: Option<f64>,
    pub long_run_goal: Option<f64>,
}

/// Update one or both goals.
async fn update_goals(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<GoalsRequest>,
) -> Result<Json<GoalsResponse>> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if req.mileage_goal.is_none() && req.long_run_goal.is_none() {
        return Err(AppError::BadRequest("No goal provided".to_string()));
    }

    if let Some(goal) = req.mileage_goal {
        state.db.set_mileage_goal(user.user_id, goal).await?;
    }
    if let Some(goal) = req.long_run_goal {
        state.db.set_long_run_goal(user.user_id, goal).await?;
    }

    tracing::info!(
        user_id = user.user_id,
        mileage_goal = ?req.mileage_goal,
        long_run_goal = ?req.long_run_goal,
        "Goals updated"
    );

    let athlete = state.db.get_athlete(user.user_id).await?;
    Ok(Json(GoalsResponse {
        mileage_goal: athlete.as_ref().and_then(|a| a.mileage_goal),
        long_run_goal: athlete.as_ref().and_then(|a| a.long_run_goal),
    }))
}
