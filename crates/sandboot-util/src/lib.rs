//! Shared utilities for sandboot.
//!
//! This crate provides common utilities used across the sandboot workspace:
//! - Logging setup with tracing
//! - Output truncation for UI-bound process output

pub mod log;
pub mod truncate;

pub use truncate::truncate_output;
