//! Command implementations

pub mod config;
pub mod queue;
pub mod sync;
