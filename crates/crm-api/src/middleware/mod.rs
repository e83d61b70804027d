//! # Middleware Stack
//!
//! Tower middleware for the API layer:
//! - [`metrics`]: in-process request and error counters.
//!
//! Session resolution lives in [`crate::auth`] and the area gate in
//! [`crate::gate`]; both need [`AppState`](crate::state::AppState).

pub mod metrics;
