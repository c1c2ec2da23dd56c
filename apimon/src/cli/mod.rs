//! Command-line interface for apimon
//!
//! Argument parsing lives in [`args`]; [`commands`] runs each subcommand
//! against a platform and returns the text to print.

pub mod args;
pub mod commands;

pub use args::{Args, Command};
