//! Test doubles and database helpers for exercising dump runs.
//!
//! - [`recording_store`] records statements per transaction and can fail on demand.
//! - [`faulty_counter`] wraps a counter source and fails deletion or commit on demand.
//! - [`database`] spawns isolated Postgres databases for integration tests.
//! - [`failpoints`] configures `fail` scenarios that reset on drop.

pub mod database;
pub mod failpoints;
pub mod faulty_counter;
pub mod recording_store;
