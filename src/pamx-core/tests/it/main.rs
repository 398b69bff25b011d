//! Consolidated integration tests for pamx-core.
//!
//! A single test binary keeps link time down and avoids parallel proptest
//! binaries competing for the runner.

mod integrity;
mod reconcile;
mod security;
mod web;
