//! Subcommand implementations
//!
//! Each command builds a [`Monitor`] over the host platform (or an
//! in-memory one where the input is self-contained) and returns printable
//! lines, so `main` only has to do I/O.

use std::sync::Arc;

use crate::config::{AliasRule, MonitorConfig};
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::domain::{Handle, SymbolError};
use crate::monitor::Monitor;
use crate::platform::{DosDevices, ObjectNames, OfflinePlatform, PathResolver};
use crate::symbolization::{MappedImage, SymbolResolver};
use crate::wide::{wide, WideBuf};

#[cfg(windows)]
pub type HostPlatform = crate::platform::WindowsPlatform;
#[cfg(not(windows))]
pub type HostPlatform = OfflinePlatform;

/// Handle the raw registry name is filed under for [`registry_key`]
const RAW_KEY_HANDLE: Handle = Handle(0x4);

/// Platform for commands that query the machine.
///
/// Off Windows there is no file system to consult, so every path is taken
/// to exist as spelled.
#[must_use]
pub fn host_platform() -> HostPlatform {
    #[cfg(windows)]
    {
        crate::platform::WindowsPlatform::new()
    }
    #[cfg(not(windows))]
    {
        let mut platform = OfflinePlatform::new();
        platform.assume_paths_exist(true);
        platform
    }
}

fn sink() -> Arc<dyn DiagnosticSink> {
    Arc::new(LogSink)
}

fn with_rules(mut config: MonitorConfig, rules: Vec<AliasRule>) -> MonitorConfig {
    config.aliases.extend(rules);
    config
}

/// Canonical form of a raw path, empty when it cannot be canonicalized.
pub fn canonical_path<P>(config: MonitorConfig, rules: Vec<AliasRule>, platform: P, raw: &str) -> String
where
    P: DosDevices + PathResolver + ObjectNames,
{
    let monitor = Monitor::attach(with_rules(config, rules), platform, sink());
    let mut out = WideBuf::new();
    monitor.paths().from_string(Some(wide(raw).as_slice()), &mut out);
    out.to_string_lossy()
}

/// Canonical form of a raw kernel key name, optionally joined with a subkey.
#[must_use]
pub fn registry_key(config: MonitorConfig, raw: &str, subkey: Option<&str>) -> String {
    let mut platform = OfflinePlatform::new();
    platform.add_key(RAW_KEY_HANDLE.0, raw);
    let monitor = Monitor::attach(config, platform, sink());

    let mut out = WideBuf::new();
    match subkey {
        Some(subkey) => monitor.registry().resolve(RAW_KEY_HANDLE, Some(wide(subkey).as_slice()), &mut out),
        None => monitor.registry().resolve_key(RAW_KEY_HANDLE, &mut out),
    };
    out.to_string_lossy()
}

/// Exports surrounding `rva` in `image`.
///
/// # Errors
/// Returns the resolver's error when the image exports nothing usable.
pub fn symbol(image: &MappedImage, rva: usize) -> Result<String, SymbolError> {
    let range = SymbolResolver::new(image).resolve(image.address_of(rva))?;
    Ok(match &range.module_name {
        Some(module) => format!("{module}!{range}"),
        None => range.to_string(),
    })
}

/// One `pattern -> replacement` line per alias, in match order.
pub fn alias_lines<P: DosDevices>(config: MonitorConfig, rules: Vec<AliasRule>, platform: P) -> Vec<String> {
    let monitor = Monitor::attach(with_rules(config, rules), platform, sink());
    monitor
        .aliases()
        .iter()
        .map(|alias| {
            format!(
                "{} -> {}",
                String::from_utf16_lossy(alias.pattern()),
                String::from_utf16_lossy(alias.replacement())
            )
        })
        .collect()
}

/// Symbolized frames of the calling thread.
#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
#[must_use]
pub fn stack_frames(config: MonitorConfig) -> Vec<String> {
    let monitor = Monitor::attach(config, crate::platform::WindowsPlatform::new(), sink());
    let symbols = monitor.symbols();
    monitor
        .capture_stack()
        .into_iter()
        .enumerate()
        .map(|(i, address)| match symbols.resolve(address) {
            Ok(range) => range.format_frame(i),
            Err(e) => format!("#{i:<2} 0x{address:016x} <{e}>"),
        })
        .collect()
}
