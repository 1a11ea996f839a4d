//! Localnet CLI - isolated local clusters for integration tests.

pub mod commands;
pub mod output;
