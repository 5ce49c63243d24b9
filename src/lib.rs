// ABOUTME: Library root for deckhand - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod app;
pub mod broadcast;
pub mod config;
pub mod deploy;
pub mod error;
pub mod metrics;
pub mod output;
pub mod ssh;
pub mod store;
pub mod types;
