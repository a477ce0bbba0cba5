//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - The core client library stays free of UI and terminal crates
//! - Logging subscribers are installed by binaries, never by the library
//! - Wire record splitting lives in exactly one module
//! - Core dev-dependencies stay exercised by the test suite
//!
//! These tests are designed to catch violations early in the development cycle.

#![allow(dead_code)]

pub fn placeholder() {
    // Placeholder to make this a valid library
}
