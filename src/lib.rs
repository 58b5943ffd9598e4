//! rmk - incremental build orchestrator
//!
//! Builds a graph of jobs declared in build files, reusing persisted
//! results while their inputs are unchanged and optionally sharing
//! artifacts through a remote HTTP cache.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod paths;
pub mod plan;
pub mod policy;
pub mod process;

pub use error::{RmkError, RmkResult};
