//! textgate - Authenticated HTTP frontend for an OpenAI-compatible inference backend
//!
//! This library provides the core functionality for the textgate server:
//! configuration, the inbound auth guard, and the completion relay.

pub mod auth;
pub mod config;
pub mod error;
pub mod relay;

pub use config::Config;
pub use error::{Error, Result};
