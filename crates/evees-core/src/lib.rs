//! evees-core library.
//!
//! Content-addressed, perspective-based versioned data. Immutable entities
//! (data and commits) live in content-addressed stores; perspectives are
//! mutable pointers to a head commit, owned by a remote. Reads and writes go
//! through a chain of cached clients, and the [`Evees`] service adds tree
//! operations, debounced updates, forking and context-aware merging on top.
//!
//! # Conventions
//!
//! - **Errors**: library calls return [`error::Result`]. Config loading uses
//!   `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod cas;
pub mod client;
pub mod config;
pub mod error;
pub mod evees;
pub mod merge;
pub mod patterns;
pub mod proposals;
pub mod remote;
pub mod types;

pub use cas::{CasStore, Entity, EntityCreate, Secured};
pub use client::Client;
pub use config::EveesConfig;
pub use error::{ErrorCode, EveesError, Result};
pub use evees::Evees;
pub use patterns::PatternRecognizer;
pub use remote::RemoteEvees;
