//! # partsbin
//!
//! Library half of the partsbin binary: the HTTP API, the CLI and the
//! configuration layer, exposed for the integration tests.

pub mod api;
pub mod cli;
pub mod config;
