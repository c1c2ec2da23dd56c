//! Attach-time configuration
//!
//! The controlling host hands the agent a JSON document when it injects it.
//! Every field has a default, so an empty object (or no document at all) is a
//! valid configuration.

use serde::{Deserialize, Serialize};

use apimon_common::{BUFFER_SLOT_COUNT, DEFAULT_STACK_FRAMES};

use crate::domain::ConfigError;
use crate::paths::DEFAULT_IGNORED_PREFIXES;

/// Drive-letter equivalent of `\SystemRoot\` on a stock installation
pub const DEFAULT_SYSTEM_ROOT: &str = r"C:\Windows\";

/// Extra path rewrite registered after the drive letters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Replacement for the `\SystemRoot\` symbolic path
    pub system_root: String,

    /// Normalized path prefixes handed back without OS resolution
    pub ignored_prefixes: Vec<String>,

    /// Extra rewrites, lower priority than the built-in ones
    pub aliases: Vec<AliasRule>,

    /// Pooled buffers per thread before falling back to unpooled ones
    pub slots_per_thread: usize,

    /// Frames captured per stack trace
    pub max_stack_frames: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            system_root: DEFAULT_SYSTEM_ROOT.to_string(),
            ignored_prefixes: DEFAULT_IGNORED_PREFIXES.iter().map(ToString::to_string).collect(),
            aliases: Vec::new(),
            slots_per_thread: BUFFER_SLOT_COUNT,
            max_stack_frames: DEFAULT_STACK_FRAMES,
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a configuration document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON or fails
    /// [`MonitorConfig::validate`].
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration document from disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Check the invariants the components rely on.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_root.is_empty() {
            return Err(ConfigError::Invalid("system_root must not be empty".to_string()));
        }
        if self.slots_per_thread == 0 {
            return Err(ConfigError::Invalid("slots_per_thread must be at least 1".to_string()));
        }
        if self.max_stack_frames == 0 {
            return Err(ConfigError::Invalid("max_stack_frames must be at least 1".to_string()));
        }
        if let Some(rule) = self.aliases.iter().find(|r| r.pattern.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "alias pattern for {:?} must not be empty",
                rule.replacement
            )));
        }
        Ok(())
    }

    /// `system_root` with exactly one trailing separator.
    #[must_use]
    pub fn system_root_dir(&self) -> String {
        format!("{}\\", self.system_root.trim_end_matches('\\'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MonitorConfig::from_json("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.slots_per_thread, 0x1000 / std::mem::size_of::<usize>());
        assert_eq!(config.max_stack_frames, 32);
    }

    #[test]
    fn test_partial_document() {
        let config = MonitorConfig::from_json(
            r#"{"system_root": "D:\\WINNT", "aliases": [{"pattern": "\\Device\\Mup\\", "replacement": "\\\\"}]}"#,
        )
        .unwrap();
        assert_eq!(config.system_root_dir(), r"D:\WINNT\");
        assert_eq!(config.aliases[0].pattern, r"\Device\Mup\");
        assert!(!config.ignored_prefixes.is_empty());
    }

    #[test]
    fn test_rejects_zero_slots() {
        let err = MonitorConfig::from_json(r#"{"slots_per_thread": 0}"#).unwrap_err();
        assert!(err.to_string().contains("slots_per_thread"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(MonitorConfig::from_json("{"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, r#"{"max_stack_frames": 8}"#).unwrap();
        assert_eq!(MonitorConfig::from_file(&path).unwrap().max_stack_frames, 8);
    }
}
