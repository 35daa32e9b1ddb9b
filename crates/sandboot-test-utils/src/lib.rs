//! Test utilities for sandboot.
//!
//! Provides a mock sandbox runtime for testing the bootstrap core without
//! a real execution environment.

pub mod runtime;

pub use runtime::{MockRuntime, ScriptedProcess, SpawnRecord};
