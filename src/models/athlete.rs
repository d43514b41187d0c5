// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Athlete profile and mileage goals.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Row of the `Athletes` table, one per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Athlete {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// One of `M`, `F`, `O`
    pub gender: String,
    /// Target total mileage (miles)
    pub mileage_goal: Option<f64>,
    /// Target longest single run (miles)
    pub long_run_goal: Option<f64>,
}

/// Gender as stored in the `Athletes.gender` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Map a Strava `sex` field (`"M"`, `"F"`, or anything else).
    pub fn from_strava(sex: Option<&str>) -> Self {
        match sex {
            Some("M") => Gender::Male,
            Some("F") => Gender::Female,
            _ => Gender::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Other => "O",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_from_strava() {
        assert_eq!(Gender::from_strava(Some("M")), Gender::Male);
        assert_eq!(Gender::from_strava(Some("F")), Gender::Female);
        assert_eq!(Gender::from_strava(Some("X")), Gender::Other);
        assert_eq!(Gender::from_strava(None).as_str(), "O");
    }
}
