//! Strongly-typed identifiers for tally

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform process identifier.
///
/// Unique among live processes at any instant, but the OS may hand the same
/// value to a new process once the old one exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Display name of an executable or installed program. Not unique across processes.
    ProgramName
);

string_id!(
    /// Identity of the user whose usage is being recorded
    UserName
);

string_id!(
    /// Identity of the host the agent runs on
    MachineName
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_equality() {
        let a = ProgramName::new("firefox");
        let b = ProgramName::from("firefox");
        let c = ProgramName::new("thunderbird");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn process_id_display() {
        assert_eq!(ProcessId::new(4242).to_string(), "4242");
        assert_eq!(ProcessId::from(7).as_u32(), 7);
    }

    #[test]
    fn string_ids_serialize_as_plain_strings() {
        let user = UserName::new("alice");
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, "\"alice\"");

        let parsed: UserName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, user);
    }
}
