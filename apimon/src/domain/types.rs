//! Domain types providing compile-time safety and self-documentation
//!
//! Intercepted calls hand over raw pointer-sized values. Wrapping them keeps a
//! handle from being passed where an address is expected.

use std::fmt;

use apimon_common::{
    HKEY_CLASSES_ROOT, HKEY_CURRENT_CONFIG, HKEY_CURRENT_USER, HKEY_DYN_DATA, HKEY_LOCAL_MACHINE,
    HKEY_PERFORMANCE_DATA, HKEY_USERS,
};

/// Opaque OS handle
///
/// Either a real handle owned by the monitored program or one of the
/// predefined registry root values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub usize);

impl Handle {
    pub const NULL: Handle = Handle(0);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Literal name of a predefined registry root, if this is one.
    #[must_use]
    pub fn predefined_key_name(self) -> Option<&'static str> {
        match self.0 {
            HKEY_CLASSES_ROOT => Some("HKEY_CLASSES_ROOT"),
            HKEY_CURRENT_USER => Some("HKEY_CURRENT_USER"),
            HKEY_LOCAL_MACHINE => Some("HKEY_LOCAL_MACHINE"),
            HKEY_USERS => Some("HKEY_USERS"),
            HKEY_PERFORMANCE_DATA => Some("HKEY_PERFORMANCE_DATA"),
            HKEY_CURRENT_CONFIG => Some("HKEY_CURRENT_CONFIG"),
            HKEY_DYN_DATA => Some("HKEY_DYN_DATA"),
            _ => None,
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HANDLE:{:#x}", self.0)
    }
}

impl From<usize> for Handle {
    fn from(raw: usize) -> Self {
        Handle(raw)
    }
}

/// Virtual address inside the monitored process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub usize);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(raw: usize) -> Self {
        Address(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_key_names() {
        assert_eq!(Handle(HKEY_LOCAL_MACHINE).predefined_key_name(), Some("HKEY_LOCAL_MACHINE"));
        assert_eq!(Handle(HKEY_DYN_DATA).predefined_key_name(), Some("HKEY_DYN_DATA"));
        assert_eq!(Handle(0x1c4).predefined_key_name(), None);
        assert_eq!(Handle::NULL.predefined_key_name(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Handle(0x1c4).to_string(), "HANDLE:0x1c4");
        assert_eq!(Address(0x7ff0_1000).to_string(), "0x7ff01000");
    }
}
