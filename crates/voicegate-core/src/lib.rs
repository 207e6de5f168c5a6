//! Core types, config, and errors for voicegate.

pub mod config;
pub mod error;
pub mod types;
