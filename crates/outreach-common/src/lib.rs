//! Outreach Common - Shared types and utilities
//!
//! This crate provides the configuration, error type and closed enums
//! shared by the storage layer, the execution core and the API.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
