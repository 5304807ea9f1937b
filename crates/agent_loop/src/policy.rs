use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Which side-effecting tools may actually run. Anything not permitted is
/// answered with a dry-run description instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub allow_write: bool,
    pub allow_commands: bool,
}

impl PermissionPolicy {
    pub const READ: Self = Self {
        allow_write: false,
        allow_commands: false,
    };
    pub const WRITE: Self = Self {
        allow_write: true,
        allow_commands: false,
    };
    pub const EXECUTE: Self = Self {
        allow_write: false,
        allow_commands: true,
    };
    pub const ALL: Self = Self {
        allow_write: true,
        allow_commands: true,
    };

    pub fn as_str(&self) -> &'static str {
        match (self.allow_write, self.allow_commands) {
            (false, false) => "read",
            (true, false) => "write",
            (false, true) => "execute",
            (true, true) => "all",
        }
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::READ
    }
}

impl fmt::Display for PermissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown permission policy '{value}' (expected read, write, execute or all)")]
pub struct UnknownPermissionPolicy {
    pub value: String,
}

impl FromStr for PermissionPolicy {
    type Err = UnknownPermissionPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::READ),
            "write" => Ok(Self::WRITE),
            "execute" => Ok(Self::EXECUTE),
            "all" => Ok(Self::ALL),
            _ => Err(UnknownPermissionPolicy {
                value: value.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_policy_name() {
        for policy in [
            PermissionPolicy::READ,
            PermissionPolicy::WRITE,
            PermissionPolicy::EXECUTE,
            PermissionPolicy::ALL,
        ] {
            assert_eq!(policy.as_str().parse::<PermissionPolicy>(), Ok(policy));
        }
        assert_eq!(" ALL ".parse::<PermissionPolicy>(), Ok(PermissionPolicy::ALL));
    }

    #[test]
    fn rejects_unknown_policy() {
        let error = "root".parse::<PermissionPolicy>().expect_err("unknown");
        assert!(error.to_string().contains("'root'"), "{error}");
    }
}
