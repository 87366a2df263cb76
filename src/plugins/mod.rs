//! Mission/task/job domain on top of the core store.

pub mod health;
pub mod interpreter;
pub mod lifecycle;
pub mod missions;
pub mod protocol;
pub mod queue;
pub mod workspace;
