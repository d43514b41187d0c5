// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod athlete;
pub mod user;

pub use activity::Activity;
pub use athlete::{Athlete, Gender};
pub use user::{User, UserTokens};
