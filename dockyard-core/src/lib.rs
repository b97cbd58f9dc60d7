//! # dockyard-core
//!
//! Core types shared by every dockyard crate.
//!
//! This crate provides:
//! - Error types (`DockyardError`, `ClientError`, `TransportError`, `CodecError`)
//! - Request context (`Context`)
//! - Engine API versions (`ApiVersion`)
//! - Query-string building (`QueryParams`, `ToQuery`)

mod context;
mod error;
mod query;
mod version;

pub use context::Context;
pub use error::{ClientError, CodecError, ContextError, DockyardError, TransportError};
pub use query::{QueryParams, ToQuery};
pub use version::ApiVersion;

/// Convenience alias used across the workspace.
pub type Result<T, E = DockyardError> = std::result::Result<T, E>;
