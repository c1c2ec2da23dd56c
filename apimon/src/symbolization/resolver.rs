// Display strings are assembled with format! for readability
#![allow(clippy::format_push_string)]

use std::borrow::Cow;
use std::fmt;

use rustc_demangle::try_demangle;

use crate::domain::{Address, SymbolError};
use crate::platform::ProcessMemory;
use crate::symbolization::exports::{module_base, ExportTable};
use crate::wide::WideBuf;

/// An export near a resolved address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSymbol {
    /// Name exactly as stored in the export name table
    pub name: String,

    /// Absolute address of the exported function
    pub address: usize,

    /// Distance between the export and the resolved address
    pub offset: usize,
}

impl ExportSymbol {
    /// Name for display, demangled when it is a Rust symbol.
    #[must_use]
    pub fn display_name(&self) -> Cow<'_, str> {
        match try_demangle(&self.name) {
            Ok(demangled) => Cow::Owned(format!("{demangled:#}")),
            Err(_) => Cow::Borrowed(&self.name),
        }
    }
}

/// The exports surrounding an address
///
/// `lower` is the export with the greatest address not above the target,
/// `upper` the one with the least address above it. Either may be missing at
/// the edges of the export table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRange {
    pub address: usize,
    pub module_base: usize,
    pub module_name: Option<String>,
    pub lower: Option<ExportSymbol>,
    pub upper: Option<ExportSymbol>,
}

impl SymbolRange {
    /// Write the display form into a wide buffer, returning its length.
    pub fn format_into(&self, out: &mut WideBuf) -> usize {
        out.clear();
        out.push_str(&self.to_string());
        out.len()
    }

    /// Format the frame for a stack listing
    #[must_use]
    pub fn format_frame(&self, frame_num: usize) -> String {
        let mut output = format!("#{frame_num:<2} 0x{:016x} {self}", self.address);
        if let Some(module) = &self.module_name {
            output.push_str(&format!(" ({module})"));
        }
        output
    }
}

impl fmt::Display for SymbolRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(lower) = &self.lower {
            write!(f, "{}+0x{:x}", lower.display_name(), lower.offset)?;
        }
        if self.lower.is_some() && self.upper.is_some() {
            write!(f, " / ")?;
        }
        if let Some(upper) = &self.upper {
            write!(f, "{}-0x{:x}", upper.display_name(), upper.offset)?;
        }
        Ok(())
    }
}

/// Nearest-export symbolization over a process's memory
///
/// Export tables are re-read on every call; modules are loaded and unloaded
/// while the monitored program runs, so nothing is cached.
pub struct SymbolResolver<'a, M: ?Sized> {
    memory: &'a M,
}

impl<'a, M: ProcessMemory + ?Sized> SymbolResolver<'a, M> {
    pub fn new(memory: &'a M) -> Self {
        Self { memory }
    }

    /// Find the exports surrounding `address`.
    ///
    /// # Errors
    /// - [`SymbolError::ModuleNotFound`] if no image contains the address
    /// - [`SymbolError::NoExportDirectory`] / [`SymbolError::NoExports`] if
    ///   the module exports nothing by name
    /// - [`SymbolError::MalformedExports`] if its export directory is corrupt
    pub fn resolve(&self, address: usize) -> Result<SymbolRange, SymbolError> {
        let base = module_base(self.memory, address).ok_or(SymbolError::ModuleNotFound(Address(address)))?;
        let table = ExportTable::read(self.memory, base)?;

        let mut lower: Option<(u32, usize)> = None;
        let mut upper: Option<(u32, usize)> = None;
        for index in 0..table.number_of_names {
            let Some(function) = table.function_address(self.memory, index) else {
                continue;
            };
            if function <= address {
                if lower.map_or(true, |(_, best)| function > best) {
                    lower = Some((index, function));
                }
            } else if upper.map_or(true, |(_, best)| function < best) {
                upper = Some((index, function));
            }
        }

        if lower.is_none() && upper.is_none() {
            return Err(SymbolError::NoExports(Address(base)));
        }

        let symbol = |(index, function): (u32, usize)| ExportSymbol {
            name: table.name(self.memory, index).unwrap_or_else(|| format!("#{index}")),
            address: function,
            offset: address.abs_diff(function),
        };
        let range = SymbolRange {
            address,
            module_base: base,
            module_name: table.module_name(self.memory),
            lower: lower.map(symbol),
            upper: upper.map(symbol),
        };
        log::trace!("{:#x} -> {range}", address);
        Ok(range)
    }

    /// Resolve `address` and write the display form into `out`.
    ///
    /// Returns the formatted length, 0 (with `out` cleared) when the address
    /// cannot be symbolized.
    pub fn resolve_into(&self, address: usize, out: &mut WideBuf) -> usize {
        match self.resolve(address) {
            Ok(range) => range.format_into(out),
            Err(e) => {
                log::debug!("{e}");
                out.clear();
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(name: &str, offset: usize) -> ExportSymbol {
        ExportSymbol { name: name.to_string(), address: 0x1000, offset }
    }

    fn range(lower: Option<ExportSymbol>, upper: Option<ExportSymbol>) -> SymbolRange {
        SymbolRange { address: 0x1010, module_base: 0, module_name: None, lower, upper }
    }

    #[test]
    fn test_display_both_sides() {
        let r = range(Some(export("CreateFileW", 0x10)), Some(export("CreateFileA", 0x20)));
        assert_eq!(r.to_string(), "CreateFileW+0x10 / CreateFileA-0x20");
    }

    #[test]
    fn test_display_single_side() {
        assert_eq!(range(Some(export("Sleep", 0)), None).to_string(), "Sleep+0x0");
        assert_eq!(range(None, Some(export("DllMain", 4))).to_string(), "DllMain-0x4");
    }

    #[test]
    fn test_rust_exports_are_demangled() {
        let sym = export("_ZN4core3fmt5write17h0123456789abcdefE", 0);
        assert_eq!(sym.display_name(), "core::fmt::write");
        assert_eq!(export("NtClose", 0).display_name(), "NtClose");
    }

    #[test]
    fn test_format_into_wide() {
        let r = range(Some(export("Sleep", 2)), None);
        let mut out = WideBuf::new();
        assert_eq!(r.format_into(&mut out), 9);
        assert_eq!(out, "Sleep+0x2");
    }
}
