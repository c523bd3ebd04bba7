//! Pipeline Core Library
//!
//! Shared types, provider contracts, configuration and the record store for
//! the signal pipeline.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod types;

pub use error::{Error, Result};
