//! proxlxc shared - code used by both the builder core and the CLI
//!
//! This crate contains the common error type and the constants
//! (builder id, environment variable names, defaults) of the workspace.

pub mod constants;
pub mod errors;

pub use errors::{ProxlxcError, ProxlxcResult};
