use std::sync::Arc;

use apimon::config::{AliasRule, MonitorConfig};
use apimon::diagnostics::MemorySink;
use apimon::domain::Handle;
use apimon::paths::NeverIgnore;
use apimon::platform::OfflinePlatform;
use apimon::wide::{wide, WideBuf};
use apimon::Monitor;
use apimon_common::{ObjectAttributes, UnicodeString};

fn machine() -> OfflinePlatform {
    let mut platform = OfflinePlatform::new();
    platform
        .map_drive('C', r"\Device\HarddiskVolume1")
        .map_drive('D', r"\Device\HarddiskVolume10")
        .set_current_dir(r"C:\Users\analyst")
        .add_short_name(r"C:\PROGRA~1", r"C:\Program Files")
        .add_path(r"C:\Program Files\Vendor\tool.exe")
        .add_path(r"C:\Windows\System32\drivers\etc\hosts")
        .add_path(r"C:\Users\analyst\Desktop\sample.exe")
        .add_path(r"D:\data");
    platform
}

fn monitor(platform: OfflinePlatform) -> Monitor<OfflinePlatform> {
    Monitor::attach(MonitorConfig::default(), platform, Arc::new(MemorySink::new()))
}

fn canonical(monitor: &Monitor<OfflinePlatform>, raw: &str) -> String {
    let mut out = WideBuf::new();
    let len = monitor.paths().from_string(Some(wide(raw).as_slice()), &mut out);
    assert_eq!(len, out.len(), "returned length must match the output for {raw}");
    out.to_string_lossy()
}

#[test]
fn test_spellings_of_one_file_agree() {
    let monitor = monitor(machine());
    let expected = r"C:\Program Files\Vendor\tool.exe";
    for raw in [
        r"C:\Program Files\Vendor\tool.exe",
        r"c:\progra~1\vendor\TOOL.EXE",
        r"\??\C:\PROGRA~1\Vendor\tool.exe",
        r"\\?\C:\Program Files\Vendor\tool.exe",
        r"\Device\HarddiskVolume1\PROGRA~1\Vendor\tool.exe",
        r"\??\GLOBALROOT\Device\HarddiskVolume1\Program Files\Vendor\tool.exe",
    ] {
        assert_eq!(canonical(&monitor, raw), expected, "canonicalizing {raw}");
    }
}

#[test]
fn test_system_root_alias() {
    let monitor = monitor(machine());
    assert_eq!(canonical(&monitor, r"\SystemRoot\System32\drivers\etc\hosts"), r"C:\Windows\System32\drivers\etc\hosts");
}

#[test]
fn test_device_prefix_needs_separator() {
    let monitor = monitor(machine());
    // Volume10 must not be rewritten by the Volume1 rule
    assert_eq!(canonical(&monitor, r"\Device\HarddiskVolume10\data\new.txt"), r"D:\data\new.txt");
}

#[test]
fn test_relative_paths_use_current_directory() {
    let monitor = monitor(machine());
    assert_eq!(canonical(&monitor, r"Desktop\sample.exe"), r"C:\Users\analyst\Desktop\sample.exe");
    assert_eq!(canonical(&monitor, r"..\analyst\.\Desktop\sample.exe"), r"C:\Users\analyst\Desktop\sample.exe");
}

#[test]
fn test_nonexistent_tail_is_preserved() {
    let monitor = monitor(machine());
    assert_eq!(
        canonical(&monitor, r"\??\C:\PROGRA~1\Vendor\logs\today\run.log"),
        r"C:\Program Files\Vendor\logs\today\run.log"
    );
}

#[test]
fn test_long_path_keeps_missing_tail() {
    let deep = (0..30).map(|i| format!("dir{i:02}xxxxxx")).collect::<Vec<_>>().join(r"\");
    let mut platform = machine();
    platform.add_path(&format!(r"C:\Program Files\{deep}"));
    let monitor = monitor(platform);

    let raw = format!(r"\Device\HarddiskVolume1\PROGRA~1\{deep}\synthetic\more\file.txt");
    let expected = format!(r"C:\Program Files\{deep}\synthetic\more\file.txt");
    assert!(raw.len() > 260 && expected.len() > 260);
    assert_eq!(canonical(&monitor, &raw), expected);
}

#[test]
fn test_unmapped_drive_yields_nothing() {
    let monitor = monitor(machine());
    assert_eq!(canonical(&monitor, r"Q:\nowhere\file"), "");
}

#[test]
fn test_pipes_are_not_resolved() {
    let monitor = monitor(machine());
    assert_eq!(canonical(&monitor, r"\??\pipe\lsass"), r"\\?\pipe\lsass");
    assert_eq!(canonical(&monitor, r"\\?\MAILSLOT\x"), r"\\?\MAILSLOT\x");
}

#[test]
fn test_custom_ignore_policy() {
    let monitor = monitor(machine()).with_ignore_policy(Box::new(NeverIgnore));
    // Nothing in the pipe namespace resolves as a file
    assert_eq!(canonical(&monitor, r"\??\pipe\lsass"), "");
}

#[test]
fn test_configured_aliases_apply_after_drives() {
    let config = MonitorConfig {
        aliases: vec![AliasRule { pattern: r"\Device\LanmanRedirector\".into(), replacement: r"D:\".into() }],
        ..MonitorConfig::default()
    };
    let monitor = Monitor::attach(config, machine(), Arc::new(MemorySink::new()));
    assert_eq!(canonical(&monitor, r"\Device\LanmanRedirector\data"), r"D:\data");
}

#[test]
fn test_ansi_input() {
    let monitor = monitor(machine());
    let mut out = WideBuf::new();
    monitor.paths().from_ansi(Some(b"c:\\progra~1\\vendor\\tool.exe\0garbage"), &mut out);
    assert_eq!(out, r"C:\Program Files\Vendor\tool.exe");
    assert_eq!(monitor.paths().from_ansi(None, &mut out), 0);
}

#[test]
fn test_handles() {
    let mut platform = machine();
    platform.add_object(0x1c4, r"\Device\HarddiskVolume1\Windows\System32\drivers\etc\hosts");
    let monitor = monitor(platform);

    let mut out = WideBuf::new();
    monitor.paths().from_handle(Handle(0x1c4), &mut out);
    assert_eq!(out, r"C:\Windows\System32\drivers\etc\hosts");
    assert_eq!(monitor.paths().from_handle(Handle(0x999), &mut out), 0);
    assert!(out.is_empty());
}

#[test]
fn test_unicode_strings() {
    let monitor = monitor(machine());
    let raw = wide(r"\??\C:\PROGRA~1\Vendor\tool.exe");
    let name = UnicodeString::from_slice(&raw);

    let mut out = WideBuf::new();
    let len = unsafe { monitor.paths().from_unicode_string(Some(&name), &mut out) };
    assert_eq!(len, out.len());
    assert_eq!(out, r"C:\Program Files\Vendor\tool.exe");

    let null = UnicodeString::null();
    assert_eq!(unsafe { monitor.paths().from_unicode_string(Some(&null), &mut out) }, 0);
    assert_eq!(unsafe { monitor.paths().from_unicode_string(None, &mut out) }, 0);
}

#[test]
fn test_object_attributes_join_root_and_name() {
    let mut platform = machine();
    platform.add_object(0x30, r"\Device\HarddiskVolume1\Program Files");
    let monitor = monitor(platform);

    let relative = wide(r"Vendor\tool.exe");
    let name = UnicodeString::from_slice(&relative);
    let mut out = WideBuf::new();

    let attributes = ObjectAttributes::new(0x30, Some(&name));
    unsafe { monitor.paths().from_object_attributes(Some(&attributes), &mut out) };
    assert_eq!(out, r"C:\Program Files\Vendor\tool.exe");

    // Root only
    let attributes = ObjectAttributes::new(0x30, None);
    unsafe { monitor.paths().from_object_attributes(Some(&attributes), &mut out) };
    assert_eq!(out, r"C:\Program Files");

    // Name only
    let absolute = wide(r"\??\C:\Program Files\Vendor");
    let name = UnicodeString::from_slice(&absolute);
    let attributes = ObjectAttributes::new(0, Some(&name));
    unsafe { monitor.paths().from_object_attributes(Some(&attributes), &mut out) };
    assert_eq!(out, r"C:\Program Files\Vendor");

    assert_eq!(unsafe { monitor.paths().from_object_attributes(None, &mut out) }, 0);
}

#[test]
fn test_output_never_exceeds_capacity() {
    let monitor = monitor(machine());
    let long = format!(r"C:\Program Files\{}", "a".repeat(40_000));
    let mut out = WideBuf::with_capacity(64);
    let len = monitor.paths().from_string(Some(wide(&long).as_slice()), &mut out);
    assert_eq!(len, 64);
    assert_eq!(out.len(), 64);
}

#[test]
fn test_buffers_return_to_pool() {
    let monitor = monitor(machine());
    for raw in [r"C:\Program Files", r"\Device\HarddiskVolume1\x", r"Q:\x"] {
        canonical(&monitor, raw);
    }
    let stats = monitor.pool().stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.slots > 0);
}
