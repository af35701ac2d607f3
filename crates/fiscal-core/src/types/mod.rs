//! Type definitions for resilience configuration

mod resilience_config;

pub use resilience_config::*;
