//! Error types for the applied state store.
//!
//! Transport, configuration, and startup failures are represented with
//! `anyhow::Error` throughout the rest of the crate; only the storage
//! preconditions need a typed enum so that HTTP handlers can map them to a
//! status code without matching on strings.

use thiserror::Error;

/// Failure of a storage precondition (`Create`/`Set`/`CAS`/`Delete`/`Get`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `Create` was called for a key that already exists.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// `Set`/`CAS`/`Delete`/`Get` was called for a key that is absent.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// `CAS` was called with an `expected` value that doesn't match the
    /// current value.
    #[error("compare value did not match current value for key: {0}")]
    CompareMismatch(String),
}
