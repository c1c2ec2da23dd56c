//! # apimon - Resource-Name Canonicalization for an In-Process API Monitor
//!
//! An API-monitoring agent injected into a process sees the raw arguments of
//! every intercepted call: kernel-namespace paths, object handles, object
//! attribute records, registry key handles and code addresses. This crate
//! turns them into the stable names an analyst reads in the event log.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Hooking Engine (trampolines)                   │
//! │        raw strings · handles · UNICODE_STRING · contexts        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ apimon-common ABI records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Monitor (this crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Paths     │   │   Registry   │   │   Symbols    │         │
//! │  │ (aliases,    │   │ (key names,  │   │ (export      │         │
//! │  │  long names) │   │  HKEY roots) │   │  tables)     │         │
//! │  └──────┬───────┘   └──────┬───────┘   └──────▲───────┘         │
//! │         │                  │                  │                 │
//! │         ▼                  ▼           ┌──────┴───────┐         │
//! │  ┌─────────────────────────────────┐   │ StackWalker  │         │
//! │  │   BufferPool (per-thread)       │   │ (unwinding)  │         │
//! │  └─────────────────────────────────┘   └──────────────┘         │
//! │                                                                 │
//! │  Platform capabilities: Windows (live) | Offline (in-memory)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`paths`]: raw path, handle, counted string or object attributes →
//!   long Win32 path, through the attach-time [`paths::AliasTable`]
//! - [`registry`]: key handle and subkey → `HKEY_*` rooted key name
//! - [`symbolization`]: code address → nearest exports of its module
//! - [`stack`]: return-address capture for the calling thread
//! - [`pool`]: per-thread scratch buffers, so canonicalization never
//!   allocates through the monitored heap on the hot path
//! - [`platform`]: the OS queries above, behind injectable traits
//! - [`monitor`]: the attach-time context tying the components together
//! - [`config`], [`diagnostics`], [`domain`], [`wide`]: shared plumbing
//! - [`cli`]: argument parsing for the `apimon` diagnostic binary
//!
//! ## Typical Usage
//!
//! ```bash
//! # Canonicalize a kernel path with the local drive mapping
//! apimon path '\Device\HarddiskVolume3\PROGRA~1\app.exe'
//!
//! # Nearest exports of an RVA in a DLL on disk
//! apimon symbol kernel32.dll 0x1a2b0
//! ```
//!
//! ## Key Concepts
//!
//! - **Alias**: case-insensitive prefix rewrite, e.g. `\Device\HarddiskVolume1\` → `C:\`
//! - **Extended prefix**: `\\?\`, the Win32 spelling that bypasses path parsing
//! - **Predefined key**: the sign-extended `HKEY_*` pseudo handles
//! - **Export range**: `lower+0x.. / upper-0x..`, the exports around an address

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod monitor;
pub mod paths;
pub mod platform;
pub mod pool;
pub mod registry;
pub mod stack;
pub mod symbolization;
pub mod wide;

pub use monitor::Monitor;
#[cfg(windows)]
pub use monitor::{attach, monitor};
