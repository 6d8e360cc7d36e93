//! Current user and machine identity

use nix::unistd::{User, gethostname, getuid};
use tally_util::{MachineName, UserName};
use tracing::debug;

/// Name of the user running the agent.
///
/// Prefers `$USER`, then the passwd entry for the current uid.
pub fn current_user() -> Option<UserName> {
    if let Ok(user) = std::env::var("USER")
        && !user.trim().is_empty()
    {
        return Some(UserName::new(user));
    }

    match User::from_uid(getuid()) {
        Ok(Some(user)) => Some(UserName::new(user.name)),
        Ok(None) => None,
        Err(e) => {
            debug!(error = %e, "passwd lookup failed");
            None
        }
    }
}

/// Hostname of this machine
pub fn machine_name() -> Option<MachineName> {
    match gethostname() {
        Ok(name) => name
            .into_string()
            .ok()
            .filter(|n| !n.is_empty())
            .map(MachineName::new),
        Err(e) => {
            debug!(error = %e, "gethostname failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_resolves() {
        let name = machine_name().expect("hostname should be available");
        assert!(!name.as_str().is_empty());
    }
}
