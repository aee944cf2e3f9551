//! Authenticated relay to the inference backend.
//!
//! This module provides the HTTP surface that accepts generation requests,
//! checks the caller's credential, and forwards the prompt to the configured
//! chat-completion backend, buffered or streamed.

mod client;
mod handlers;
mod server;
pub mod stream;
pub mod types;

pub use client::{BackendClient, FragmentStream};
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
