//! # API Route Modules
//!
//! - `contacts`, `companies`, `deals`, `tasks`: entity CRUD under `/api`,
//!   built on the shared helpers in `crud`.
//! - `activities`: activity log listing and manual entries.
//! - `avatar`: profile picture upload.
//! - `users`: staff account management and role changes.
//! - `session`: login, sign-up, logout.
//! - `backoffice`: staff views (dashboard, pipeline, reports, calendar,
//!   search, settings).
//! - `portal`: customer views and messages.

pub mod activities;
pub mod avatar;
pub mod backoffice;
pub mod companies;
pub mod contacts;
pub mod crud;
pub mod deals;
pub mod portal;
pub mod session;
pub mod tasks;
pub mod users;
