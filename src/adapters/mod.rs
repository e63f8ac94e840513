//! Adapters: concrete implementations of the domain ports.

pub mod http;
pub mod integrations;
pub mod sqlite;
