//! PWA Android Builder
//!
//! Turns a web app's URL and manifest into signed Android artifacts (APK and
//! App Bundle). Builds run asynchronously behind a bounded-concurrency
//! scheduler; jobs and per-domain signing identities live in PostgreSQL.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
