//! Core types and trait definitions for the DCF valuation pipeline.
//!
//! This crate has no HTTP or database dependencies.
//! Storage backends implement [`store::FactStore`] and
//! [`store::FreshnessLedger`]; market-data adapters implement
//! [`fetch::FactProvider`].

// Native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod config;
pub mod error;
pub mod fact;
pub mod fetch;
pub mod freshness;
pub mod memory;
pub mod pipeline;
pub mod record;
pub mod result;
pub mod store;
pub mod valuation;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
