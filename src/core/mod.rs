//! Shared primitives: errors, configuration, the record store and its locks,
//! the lifecycle audit log, and identifier/time helpers.

pub mod audit;
pub mod config;
pub mod error;
pub mod lock;
pub mod output;
pub mod store;
pub mod time;
