//! Clip harvester library.
//!
//! Polls a clips metadata API for a fixed set of accounts, walks each
//! account's pages back to a lookback cutoff, upserts the posts into SQLite,
//! and mirrors referenced media into S3 behind a CDN domain.

pub mod age;
pub mod config;
pub mod db;
pub mod error;
pub mod harvest;
pub mod hiker;
pub mod mirror;
pub mod profiles;
pub mod s3;
pub mod scanner;

pub use error::{HarvestError, Result};
