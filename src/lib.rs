//! # informant-rs
//!
//! Listens to a build-completion feed, keeps the builds we have test suites
//! for, and dispatches them to a fixed pool of test-discovery workers.
//!
//! The dispatch core is a bounded queue that drops the oldest pending build
//! under overload, a worker pool that survives per-build failures, and a
//! shutdown sequence that drains inflight work before reclaiming scratch
//! directories.

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod filter;
pub mod model;
pub mod processor;
pub mod queue;
pub mod resources;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
