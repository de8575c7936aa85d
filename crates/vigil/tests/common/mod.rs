//! Shared test utilities for vigil integration tests.
//!
//! This module provides:
//! - `TestHarness`: a file-backed store in a temp directory, an
//!   `Orchestrator` and a scripted process table
//! - builders that write rows the way the external worker does

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{FakeProcessEnvironment, TestHarness};
