//! Domain model for apimon
//!
//! Core newtypes and error enums shared by every canonicalizer:
//! - Raw handles and addresses carried as distinct types
//! - Structured error handling via thiserror

pub mod errors;
pub mod types;

pub use types::{Address, Handle};

pub use errors::{AliasError, ConfigError, ImageError, NameError, SymbolError};
