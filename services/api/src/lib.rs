//! Wanda API Library Crate
//!
//! This library contains the logic for the Wanda web service: configuration,
//! upstream clients, API handlers and routing. The `api` binary is a thin
//! wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod upstream;
