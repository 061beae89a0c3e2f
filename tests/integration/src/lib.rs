//! End-to-end tests for streamkeeper
//!
//! This test suite validates:
//! - The staged publish protocol against an in-memory depot
//! - Reopen, edit and add paths for the snapshot file
//! - Pending changelist reporting on failure
//! - Revision listing, preview and restore
//! - The per-root publish guard under concurrency

pub mod test_utils;

#[cfg(test)]
mod publish_protocol_tests;

#[cfg(test)]
mod history_restore_tests;

#[cfg(test)]
mod concurrency_tests;
