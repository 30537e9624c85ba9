//! Shared domain types for the Maestro workflow runtime.
//!
//! Everything here is transport-agnostic: the event envelope, node
//! results, the UI component contract, flow definitions, configuration,
//! and the shared error type. Crates higher in the stack (store, kernel,
//! clients, gateway) depend on this one and nothing in it depends on them.

pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod node;
pub mod trace;
pub mod ui;

pub use error::{Error, ErrorCode, Result};
