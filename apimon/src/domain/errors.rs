//! Structured error types for apimon
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Canonicalizers themselves never fail loudly: these errors are returned by
//! the fallible lookups underneath them and logged or mapped to empty output.

use super::types::{Address, Handle};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AliasError {
    #[error("Too many aliases! Capacity of {capacity} exceeded while adding {pattern}")]
    CapacityExceeded { capacity: usize, pattern: String },

    #[error("Alias for {replacement} has an empty pattern")]
    EmptyPattern { replacement: String },
}

/// Failure to retrieve the kernel name behind a handle
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    #[error("Name of {0} could not be retrieved")]
    Unresolved(Handle),

    #[error("Name of {handle} is {length} code units long, more than fits in a buffer")]
    TooLong { handle: Handle, length: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Unable to find module for address {0}")]
    ModuleNotFound(Address),

    #[error("Module at {0} has no export directory")]
    NoExportDirectory(Address),

    #[error("Module at {0} exports no names")]
    NoExports(Address),

    #[error("Malformed export directory in module at {base}: {reason}")]
    MalformedExports { base: Address, reason: &'static str },
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Not a PE image")]
    NotPe,

    #[error("Failed to parse image: {0}")]
    Parse(#[from] object::read::Error),

    #[error("Section {name} does not fit the image layout")]
    SectionOutOfBounds { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
