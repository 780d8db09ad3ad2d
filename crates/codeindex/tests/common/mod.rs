//! Shared test utilities for codeindex integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs over a temporary source tree and database
//! - Scripted embedding providers that succeed, fail on chosen functions,
//!   fail once, or block until released

pub mod embedders;
pub mod harness;

pub use embedders::*;
pub use harness::TestHarness;
