//! Yahoo Finance adapter for the DCF pipeline.
//!
//! [`YahooProvider`] implements [`dcf_core::fetch::FactProvider`]. Statement
//! fields come from the fundamentals time series, point-in-time `info` fields
//! from the quote summary, and fiscal-date share prices from daily history.
//! Parsing and assembly live in [`parse`] and never touch the network.

mod client;

pub mod error;
pub mod parse;

pub use client::{YahooConfig, YahooProvider};
pub use error::{Error, Result};
