//! Shared test utilities for depcapture
//!
//! - Temporary base paths populated with unit files, resources and archives
//! - Helpers for inspecting stores

pub mod fixtures;
