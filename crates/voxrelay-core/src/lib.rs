//! Core types, config, and errors for VoxRelay.

pub mod config;
pub mod error;
pub mod types;
