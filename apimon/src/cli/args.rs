//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AliasRule;

#[derive(Parser)]
#[command(
    name = "apimon",
    about = "Canonicalize paths, registry keys and code addresses the way the API monitor logs them",
    after_help = "\
EXAMPLES:
    apimon path '\\??\\C:\\PROGRA~1\\App\\app.exe'
    apimon path '\\Device\\HarddiskVolume3\\x.txt' --alias '\\Device\\HarddiskVolume3=D:'
    apimon regkey '\\REGISTRY\\USER\\S-1-5-18\\Environment' --subkey Path
    apimon symbol C:\\Windows\\System32\\kernel32.dll 0x1a2b0"
)]
pub struct Args {
    /// Monitor configuration document (JSON, as handed over by the host)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Canonicalize a raw file path
    Path {
        /// Path as an intercepted API would receive it
        raw: String,

        /// Extra device rewrite, e.g. `\Device\HarddiskVolume3=D:`
        #[arg(long = "alias", value_name = "DEVICE=DRIVE", value_parser = parse_alias)]
        aliases: Vec<AliasRule>,
    },

    /// Normalize a raw kernel registry key name
    Regkey {
        /// Key name as the kernel reports it, e.g. `\REGISTRY\MACHINE\SOFTWARE`
        raw: String,

        /// Subkey or value name to append (omitted renders `(Default)`)
        #[arg(long)]
        subkey: Option<String>,
    },

    /// Show the exports surrounding an RVA of a PE file on disk
    Symbol {
        /// Module file
        image: PathBuf,

        /// Relative virtual address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_rva)]
        rva: usize,
    },

    /// List the path alias table
    Aliases {
        #[arg(long = "alias", value_name = "DEVICE=DRIVE", value_parser = parse_alias)]
        aliases: Vec<AliasRule>,
    },

    /// Walk and symbolize the current thread's stack (Windows only)
    Stack,
}

/// Parse `DEVICE=DRIVE` into a backslash-terminated rewrite rule.
pub fn parse_alias(value: &str) -> Result<AliasRule, String> {
    let (device, drive) = value.split_once('=').ok_or_else(|| format!("expected DEVICE=DRIVE, got {value:?}"))?;
    if device.is_empty() || drive.is_empty() {
        return Err(format!("expected DEVICE=DRIVE, got {value:?}"));
    }
    Ok(AliasRule {
        pattern: format!("{}\\", device.trim_end_matches('\\')),
        replacement: format!("{}\\", drive.trim_end_matches('\\')),
    })
}

pub fn parse_rva(value: &str) -> Result<usize, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid RVA {value:?}: {e}"))
}
