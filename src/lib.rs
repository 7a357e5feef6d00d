//! Hangar - worker and volume management for CI orchestration
//!
//! Tracks build artifacts and resource-fetch caches as volumes hosted on
//! a fleet of workers, decides which worker hosts an operation, and
//! reclaims volumes, caches and artifacts once nothing references them.

pub mod api;
pub mod artifact;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gc;
pub mod ledger;
pub mod node;
pub mod ui;
pub mod volume;
pub mod worker;

pub use error::{HangarError, HangarResult};
