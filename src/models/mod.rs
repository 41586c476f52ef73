// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod document;
pub mod user;

pub use document::{DocumentAccessRecord, UserStatus};
pub use user::{normalize_email, Tier, User, UserPatch};
