//! Shared types for the hamcp workspace: the error taxonomy every crate
//! surfaces and the configuration model consumed at start-up.

pub mod config;
pub mod error;

pub use error::{Error, ErrorKind, Result};
