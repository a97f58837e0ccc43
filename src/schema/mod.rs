//! Schema module - Configuration types for the terminal video player.

mod config;

pub use config::*;
