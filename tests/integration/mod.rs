//! Integration tests for depcapture
//!
//! These tests verify that the index, interceptor, sessions and store work
//! together correctly, in-process and through the binary.

#[path = "../common/mod.rs"]
pub mod common;

pub mod capture_flow;
pub mod cli;
pub mod two_pass;
