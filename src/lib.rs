//! pricewatch - daily marketplace price tracker.
//!
//! Searches a second-hand marketplace for each tracked product, extracts
//! listing prices from the rendered results page, and records a trimmed
//! median per product per day.

pub mod aggregate;
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod retry;
pub mod session;
pub mod state;
pub mod walker;
