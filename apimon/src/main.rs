//! # apimon - Main Entry Point
//!
//! Runs the canonicalizers outside a monitored process, for checking what
//! the agent would log for a given path, registry key or code address.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use apimon::cli::commands::{self, host_platform};
use apimon::cli::{Args, Command};
use apimon::config::MonitorConfig;
use apimon::symbolization::MappedImage;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_UNRESOLVED: i32 = 3;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_UNRESOLVED,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
    match &args.config {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

/// Run the selected command. Returns whether it produced a result.
fn run() -> Result<bool> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Path { raw, aliases } => {
            let path = commands::canonical_path(config, aliases, host_platform(), &raw);
            println!("{path}");
            Ok(!path.is_empty())
        }
        Command::Regkey { raw, subkey } => {
            let key = commands::registry_key(config, &raw, subkey.as_deref());
            println!("{key}");
            Ok(!key.is_empty())
        }
        Command::Symbol { image, rva } => {
            let mapped = MappedImage::load(&image).with_context(|| format!("Failed to load {}", image.display()))?;
            info!("Loaded {} ({:#x} bytes at {:#x})", image.display(), mapped.len(), mapped.base());
            let symbol = commands::symbol(&mapped, rva).with_context(|| format!("No symbol for RVA {rva:#x}"))?;
            println!("{symbol}");
            Ok(true)
        }
        Command::Aliases { aliases } => {
            for line in commands::alias_lines(config, aliases, host_platform()) {
                println!("{line}");
            }
            Ok(true)
        }
        Command::Stack => stack(config),
    }
}

#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
fn stack(config: MonitorConfig) -> Result<bool> {
    let frames = commands::stack_frames(config);
    for frame in &frames {
        println!("{frame}");
    }
    Ok(!frames.is_empty())
}

#[cfg(not(all(windows, any(target_arch = "x86", target_arch = "x86_64"))))]
fn stack(_config: MonitorConfig) -> Result<bool> {
    anyhow::bail!("Stack walking needs a live x86 or x86-64 Windows process")
}
