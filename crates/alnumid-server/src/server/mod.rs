//! Server-side components of the `alnumid` generation service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration and its validation.
//! - [`http`] - Routes, request admission and run spawning.
//! - [`runs`] - Registry of spawned runs and their outcomes.
//! - [`shortlink`] - Rate-limited client for the short-link API.
//! - [`telemetry`] - Logging initialization and optional OpenTelemetry export.

pub mod config;
pub mod http;
pub mod runs;
pub mod shortlink;
pub mod telemetry;
