//! In-memory process description
//!
//! [`OfflinePlatform`] answers every capability query from tables filled in
//! up front: drive mappings, the files that exist, named handles, registry
//! keys, mapped memory and a synthetic stack. The CLI uses it to canonicalize
//! recorded identifiers away from the machine they came from; the tests use
//! it to drive the canonicalizers through exact scenarios.

use std::collections::{BTreeMap, HashMap};
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::{Handle, NameError};
use crate::platform::{DosDevices, KeyNames, MemoryRegion, ObjectNames, PathResolver, ProcessMemory};
use crate::stack::{Registers, StackLimits, UnwindStep, UnwindStrategy, Unwinder};
use crate::symbolization::MappedImage;
use crate::wide::{self, WideBuf};

const EXTENDED_PREFIX: &str = r"\\?\";

struct MemoryBlock {
    base: usize,
    bytes: Vec<u8>,
    readable: bool,
}

impl MemoryBlock {
    fn end(&self) -> usize {
        self.base + self.bytes.len()
    }

    fn contains(&self, address: usize) -> bool {
        self.base <= address && address < self.end()
    }
}

/// Function table entry of a synthetic stack
#[derive(Debug, Clone, Copy)]
struct FunctionEntry {
    start: usize,
    end: usize,
    frame_size: usize,
}

/// Stack memory plus the function table used to unwind it
///
/// Functions registered with [`SyntheticStack::add_function`] unwind by
/// releasing `frame_size` bytes and popping the return address; every other
/// address is treated as a leaf.
pub struct SyntheticStack {
    limits: StackLimits,
    strategy: UnwindStrategy,
    bytes: Vec<u8>,
    functions: Vec<FunctionEntry>,
    context: Registers,
}

impl SyntheticStack {
    #[must_use]
    pub fn new(low: usize, high: usize, strategy: UnwindStrategy) -> Self {
        Self {
            limits: StackLimits { low, high },
            strategy,
            bytes: vec![0; high.saturating_sub(low)],
            functions: Vec::new(),
            context: Registers::default(),
        }
    }

    /// Registers reported as the current context of the calling thread.
    pub fn set_context(&mut self, context: Registers) {
        self.context = context;
    }

    /// Store a pointer-sized value. Returns `false` outside the stack.
    pub fn write_pointer(&mut self, address: usize, value: usize) -> bool {
        let Some(offset) = address.checked_sub(self.limits.low) else {
            return false;
        };
        match self.bytes.get_mut(offset..offset + size_of::<usize>()) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    pub fn add_function(&mut self, start: usize, end: usize, frame_size: usize) {
        self.functions.push(FunctionEntry { start, end, frame_size });
    }
}

struct StackState {
    limits: StackLimits,
    strategy: UnwindStrategy,
    functions: Vec<FunctionEntry>,
    context: Registers,
}

/// Capability provider backed by in-memory tables
pub struct OfflinePlatform {
    drives: BTreeMap<u8, String>,
    current_dir: String,
    assume_paths_exist: bool,
    /// Lowercased spelling (long or short) → canonical long path
    files: HashMap<String, String>,
    objects: HashMap<usize, String>,
    keys: HashMap<usize, String>,
    memory: Vec<MemoryBlock>,
    stack: Option<StackState>,
    key_queries: AtomicUsize,
    object_queries: AtomicUsize,
}

impl Default for OfflinePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflinePlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            drives: BTreeMap::new(),
            current_dir: r"C:\".to_string(),
            assume_paths_exist: false,
            files: HashMap::new(),
            objects: HashMap::new(),
            keys: HashMap::new(),
            memory: Vec::new(),
            stack: None,
            key_queries: AtomicUsize::new(0),
            object_queries: AtomicUsize::new(0),
        }
    }

    /// Map drive `letter` to a kernel device name such as
    /// `\Device\HarddiskVolume1`.
    pub fn map_drive(&mut self, letter: char, device: &str) -> &mut Self {
        if let Ok(letter) = u8::try_from(letter.to_ascii_uppercase()) {
            self.drives.insert(letter, device.to_string());
        }
        self
    }

    /// Directory relative paths are resolved against.
    pub fn set_current_dir(&mut self, dir: &str) -> &mut Self {
        self.current_dir = format!("{}\\", dir.trim_end_matches('\\'));
        self
    }

    /// Treat every path as existing, so long-path resolution echoes its
    /// input.
    pub fn assume_paths_exist(&mut self, assume: bool) -> &mut Self {
        self.assume_paths_exist = assume;
        self
    }

    /// Register an existing file or directory, along with its ancestors.
    pub fn add_path(&mut self, path: &str) -> &mut Self {
        let mut prefix = String::new();
        for (i, component) in path.trim_end_matches('\\').split('\\').enumerate() {
            if i > 0 {
                prefix.push('\\');
            }
            prefix.push_str(component);
            let entry = if i == 0 { format!("{prefix}\\") } else { prefix.clone() };
            self.files.insert(entry.to_ascii_lowercase(), entry);
        }
        self
    }

    /// Register an 8.3 spelling for an existing path.
    ///
    /// `short` must differ from `long` in its last component only.
    pub fn add_short_name(&mut self, short: &str, long: &str) -> &mut Self {
        self.add_path(long);
        self.files.insert(short.to_ascii_lowercase(), long.to_string());
        self
    }

    /// Name the object behind a handle.
    pub fn add_object(&mut self, handle: usize, name: &str) -> &mut Self {
        self.objects.insert(handle, name.to_string());
        self
    }

    /// Name the registry key behind a handle.
    pub fn add_key(&mut self, handle: usize, name: &str) -> &mut Self {
        self.keys.insert(handle, name.to_string());
        self
    }

    /// Map a block of memory at `base`.
    pub fn map_memory(&mut self, base: usize, bytes: Vec<u8>, readable: bool) -> &mut Self {
        self.memory.push(MemoryBlock { base, bytes, readable });
        self
    }

    /// Map a module image at its base address.
    pub fn map_image(&mut self, image: &MappedImage) -> &mut Self {
        self.map_memory(image.base(), image.bytes().to_vec(), true)
    }

    /// Install the calling thread's stack.
    pub fn set_stack(&mut self, stack: SyntheticStack) -> &mut Self {
        let SyntheticStack { limits, strategy, bytes, functions, context } = stack;
        self.memory.push(MemoryBlock { base: limits.low, bytes, readable: true });
        self.stack = Some(StackState { limits, strategy, functions, context });
        self
    }

    /// Number of registry key name queries answered so far.
    #[must_use]
    pub fn key_queries(&self) -> usize {
        self.key_queries.load(Ordering::Relaxed)
    }

    /// Number of object name queries answered so far.
    #[must_use]
    pub fn object_queries(&self) -> usize {
        self.object_queries.load(Ordering::Relaxed)
    }

    fn block(&self, address: usize) -> Option<&MemoryBlock> {
        self.memory.iter().find(|block| block.contains(address))
    }

    fn absolute(&self, path: &str) -> Option<String> {
        let bytes = path.as_bytes();
        let (root, rest) = if path.starts_with(r"\\") {
            return Some(path.to_string());
        } else if bytes.len() >= 2 && bytes[1] == b':' {
            (path[..2].to_string(), path[2..].trim_start_matches('\\').to_string())
        } else if path.starts_with('\\') {
            (self.current_dir[..2].to_string(), path.trim_start_matches('\\').to_string())
        } else {
            let base = &self.current_dir[..self.current_dir.len() - 1];
            (base[..2].to_string(), format!("{}\\{path}", &base[2..]).trim_start_matches('\\').to_string())
        };

        let mut parts: Vec<&str> = Vec::new();
        for component in rest.split('\\') {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        let trailing = if rest.ends_with('\\') && !parts.is_empty() { "\\" } else { "" };
        Some(format!("{root}\\{}{trailing}", parts.join("\\")))
    }

    /// `X:\\` for a mapped drive letter.
    fn mapped_drive_root(&self, root: &str) -> Option<String> {
        match root.as_bytes() {
            [letter, b':', b'\\'] if self.drives.contains_key(&letter.to_ascii_uppercase()) => {
                Some(root.to_ascii_uppercase())
            }
            _ => None,
        }
    }

    fn long_form(&self, path: &str) -> Option<String> {
        let mut components = path.split('\\');
        let root = format!("{}\\", components.next()?);
        let mut canonical = match self.files.get(&root.to_ascii_lowercase()) {
            Some(known) => known.clone(),
            None => self.mapped_drive_root(&root)?,
        };
        for component in components.filter(|c| !c.is_empty()) {
            let candidate = if canonical.ends_with('\\') {
                format!("{canonical}{component}")
            } else {
                format!("{canonical}\\{component}")
            };
            canonical = self.files.get(&candidate.to_ascii_lowercase())?.clone();
        }
        if path.ends_with('\\') && !canonical.ends_with('\\') {
            canonical.push('\\');
        }
        Some(canonical)
    }
}

impl DosDevices for OfflinePlatform {
    fn query_dos_device(&self, letter: u8, out: &mut WideBuf) -> bool {
        out.clear();
        self.drives.get(&letter).is_some_and(|device| out.push_str(device))
    }
}

impl PathResolver for OfflinePlatform {
    fn full_path_name(&self, path: &WideBuf, out: &mut WideBuf) -> bool {
        out.clear();
        if path.is_empty() {
            return false;
        }
        if path.starts_with_ignore_case(EXTENDED_PREFIX) {
            return out.assign(path.as_slice());
        }
        self.absolute(&path.to_string_lossy()).is_some_and(|full| out.push_str(&full))
    }

    fn long_path_name(&self, path: &WideBuf, out: &mut WideBuf) -> bool {
        out.clear();
        if self.assume_paths_exist {
            return !path.is_empty() && out.assign(path.as_slice());
        }
        let text = path.to_string_lossy();
        let (prefix, body) = match text.get(..4) {
            Some(p) if p.eq_ignore_ascii_case(EXTENDED_PREFIX) => (&text[..4], &text[4..]),
            _ => ("", text.as_str()),
        };
        match self.long_form(body) {
            Some(long) => out.push_str(prefix) && out.push_str(&long),
            None => false,
        }
    }
}

impl ObjectNames for OfflinePlatform {
    fn object_name(&self, handle: Handle, out: &mut WideBuf) -> Result<(), NameError> {
        self.object_queries.fetch_add(1, Ordering::Relaxed);
        out.clear();
        let name = self.objects.get(&handle.0).ok_or(NameError::Unresolved(handle))?;
        let units = wide::wide(name);
        if units.len() > out.capacity() {
            return Err(NameError::TooLong { handle, length: units.len() });
        }
        out.assign(&units);
        Ok(())
    }
}

impl KeyNames for OfflinePlatform {
    fn key_name(&self, handle: Handle, out: &mut WideBuf) -> Result<(), NameError> {
        self.key_queries.fetch_add(1, Ordering::Relaxed);
        out.clear();
        let name = self.keys.get(&handle.0).ok_or(NameError::Unresolved(handle))?;
        let units = wide::wide(name);
        if units.len() > out.capacity() {
            return Err(NameError::TooLong { handle, length: units.len() });
        }
        out.assign(&units);
        Ok(())
    }
}

impl ProcessMemory for OfflinePlatform {
    fn region(&self, address: usize) -> Option<MemoryRegion> {
        self.block(address).map(|block| MemoryRegion {
            base: block.base,
            allocation_base: block.base,
            size: block.bytes.len(),
            readable: block.readable,
        })
    }

    fn read(&self, address: usize, buf: &mut [u8]) -> bool {
        let Some(block) = self.block(address).filter(|b| b.readable) else {
            return false;
        };
        let offset = address - block.base;
        match block.bytes.get(offset..offset + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}

impl Unwinder for OfflinePlatform {
    type Context = Registers;

    fn capture_context(&self) -> Registers {
        self.stack.as_ref().map_or_else(Registers::default, |s| s.context)
    }

    fn stack_limits(&self) -> StackLimits {
        self.stack.as_ref().map_or(StackLimits { low: 0, high: 0 }, |s| s.limits)
    }

    fn strategy(&self) -> UnwindStrategy {
        self.stack.as_ref().map_or(UnwindStrategy::Metadata, |s| s.strategy)
    }

    fn registers(&self, context: &Registers) -> Registers {
        *context
    }

    fn set_registers(&self, context: &mut Registers, registers: Registers) {
        *context = registers;
    }

    fn unwind_frame(&self, context: &mut Registers) -> UnwindStep {
        let Some(stack) = &self.stack else {
            return UnwindStep::Failed;
        };
        let Some(entry) = stack.functions.iter().find(|f| f.start <= context.ip && context.ip < f.end) else {
            return UnwindStep::NoFunctionEntry;
        };
        let frame = context.sp + entry.frame_size;
        match self.read_pointer(frame) {
            Some(ip) => {
                context.ip = ip;
                context.sp = frame + size_of::<usize>();
                UnwindStep::Unwound
            }
            None => UnwindStep::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(s: &str) -> WideBuf {
        WideBuf::from_str_with_capacity(s, 260)
    }

    #[test]
    fn test_full_path_name() {
        let mut platform = OfflinePlatform::new();
        platform.set_current_dir(r"C:\Users\analyst");
        let mut out = WideBuf::new();

        assert!(platform.full_path_name(&buf(r"\\?\C:\a\..\b"), &mut out));
        assert_eq!(out, r"\\?\C:\a\..\b");
        assert!(platform.full_path_name(&buf(r"C:\a\.\b\..\c"), &mut out));
        assert_eq!(out, r"C:\a\c");
        assert!(platform.full_path_name(&buf("notes.txt"), &mut out));
        assert_eq!(out, r"C:\Users\analyst\notes.txt");
        assert!(platform.full_path_name(&buf(r"\Device\X"), &mut out));
        assert_eq!(out, r"C:\Device\X");
        assert!(!platform.full_path_name(&buf(""), &mut out));
    }

    #[test]
    fn test_long_path_name_expands_short_names() {
        let mut platform = OfflinePlatform::new();
        platform.add_short_name(r"C:\PROGRA~1", r"C:\Program Files");
        platform.add_path(r"C:\Program Files\App\app.exe");
        let mut out = WideBuf::new();

        assert!(platform.long_path_name(&buf(r"\\?\c:\progra~1\APP"), &mut out));
        assert_eq!(out, r"\\?\C:\Program Files\App");
        assert!(platform.long_path_name(&buf(r"C:\"), &mut out));
        assert_eq!(out, r"C:\");
        assert!(!platform.long_path_name(&buf(r"C:\Program Files\Other"), &mut out));
        assert!(!platform.long_path_name(&buf(r"D:\"), &mut out));
    }

    #[test]
    fn test_names_and_counters() {
        let mut platform = OfflinePlatform::new();
        platform.add_key(0x40, r"\REGISTRY\MACHINE\SOFTWARE");
        let mut out = WideBuf::new();

        assert!(platform.key_name(Handle(0x40), &mut out).is_ok());
        assert_eq!(out, r"\REGISTRY\MACHINE\SOFTWARE");
        assert_eq!(platform.key_name(Handle(0x44), &mut out), Err(NameError::Unresolved(Handle(0x44))));
        assert_eq!(platform.key_queries(), 2);

        let mut small = WideBuf::with_capacity(4);
        assert!(matches!(platform.key_name(Handle(0x40), &mut small), Err(NameError::TooLong { .. })));
    }

    #[test]
    fn test_memory_reads() {
        let mut platform = OfflinePlatform::new();
        platform.map_memory(0x1000, vec![1, 2, 3, 4], true);
        platform.map_memory(0x2000, vec![9; 4], false);

        assert_eq!(platform.read_u16(0x1002), Some(0x0403));
        assert_eq!(platform.read_u32(0x1001), None);
        assert_eq!(platform.read_u16(0x2000), None);
        assert!(platform.is_range_readable(0x1000, 4));
        assert!(!platform.is_range_readable(0x1000, 5));
        assert_eq!(platform.region(0x1003).map(|r| r.allocation_base), Some(0x1000));
    }

    #[test]
    fn test_read_c_string_stops_at_region_end() {
        let mut platform = OfflinePlatform::new();
        platform.map_memory(0x1000, b"Sleep\0xx".to_vec(), true);
        platform.map_memory(0x3000, b"Trunc".to_vec(), true);

        assert_eq!(platform.read_c_string(0x1000, 256), b"Sleep");
        assert_eq!(platform.read_c_string(0x3000, 256), b"Trunc");
    }
}
