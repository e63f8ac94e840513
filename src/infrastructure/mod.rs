//! Infrastructure: configuration loading and logging bootstrap.

pub mod config;
pub mod logging;
