// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Mileage tracker: running goals backed by Strava activity history.
//!
//! This crate provides the backend API that stores users, athlete goals and
//! daily mileage in SQLite, and keeps that mileage in sync with Strava.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::Database;
use services::StravaService;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub strava_service: StravaService,
}
