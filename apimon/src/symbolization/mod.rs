//! # Symbol Resolution from Export Tables
//!
//! Turns a code address inside the monitored process into the names of the
//! exported functions around it, e.g. `CreateFileW+0x1a / CreateFileA-0x40`.
//! Monitored programs rarely ship debug information, but every DLL they
//! call into carries an export table, so the nearest exports are the most
//! precise attribution available at call time.
//!
//! ## Resolution Steps
//!
//! 1. Query the memory region containing the address; its allocation base
//!    is the module base. The base must be readable and start with `MZ`.
//! 2. Follow `e_lfanew` to the NT headers (PE32 or PE32+) and read the
//!    export data directory.
//! 3. For every exported name, map name index → ordinal → function RVA and
//!    compute the absolute function address.
//! 4. Keep the greatest address not above the target (`lower`) and the
//!    least address above it (`upper`).
//!
//! An export at exactly the target address is reported as `lower` with
//! offset 0.
//!
//! ## Offline Use
//!
//! [`MappedImage`] lays a PE file out in loader layout with the `object`
//! crate, so the same resolver can symbolize RVAs of a module on disk.
//!
//! ## Libraries Used
//!
//! - `object`: PE header and export directory layouts, PE file parsing
//! - `rustc-demangle`: display names for Rust exports

pub mod exports;
pub mod image;
pub mod resolver;

pub use exports::{module_base, ExportTable};
pub use image::MappedImage;
pub use resolver::{ExportSymbol, SymbolRange, SymbolResolver};
