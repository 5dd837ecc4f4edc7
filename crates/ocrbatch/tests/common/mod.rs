//! Shared test utilities for ocrbatch integration tests.
//!
//! This module provides:
//! - `TestHarness`: a temporary document root with its own catalog
//! - Fake OCR, text extraction and search sink collaborators

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
