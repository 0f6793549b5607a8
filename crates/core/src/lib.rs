//! Portway Core Types
//!
//! Configuration, lifecycle states and error types shared by every Portway crate.

mod config;
mod error;
mod types;

pub use config::*;
pub use error::*;
pub use types::*;
