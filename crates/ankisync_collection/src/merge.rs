//! Merge policies for remote changes.

use ankisync_protocol::Record;
use std::fmt;
use std::str::FromStr;

/// Policy deciding whether a remote record replaces the local one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// The record with the later modification time wins; ties keep local.
    #[default]
    LastWriteWins,
    /// Local records are never replaced; remote ones are only inserted.
    ServerWins,
    /// Remote records always replace local ones.
    ClientWins,
}

impl MergePolicy {
    /// Returns true if `remote` should be stored over `local`.
    pub fn should_replace(&self, local: Option<&Record>, remote: &Record) -> bool {
        match (self, local) {
            (_, None) => true,
            (MergePolicy::LastWriteWins, Some(local)) => remote.mtime > local.mtime,
            (MergePolicy::ServerWins, Some(_)) => false,
            (MergePolicy::ClientWins, Some(_)) => true,
        }
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" | "lww" => Ok(MergePolicy::LastWriteWins),
            "server-wins" | "server" => Ok(MergePolicy::ServerWins),
            "client-wins" | "client" => Ok(MergePolicy::ClientWins),
            other => Err(format!("unknown merge policy: {}", other)),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergePolicy::LastWriteWins => "last-write-wins",
            MergePolicy::ServerWins => "server-wins",
            MergePolicy::ClientWins => "client-wins",
        };
        f.write_str(name)
    }
}

/// What a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records that did not exist locally.
    pub inserted: usize,
    /// Local records replaced by remote ones.
    pub replaced: usize,
    /// Remote records the policy rejected.
    pub skipped: usize,
    /// Tags registered.
    pub tags_added: usize,
    /// Review log entries appended.
    pub revlog_added: usize,
    /// Whether config or creation time was taken from the remote side.
    pub config_applied: bool,
}

impl MergeStats {
    /// Number of entities written.
    pub fn applied(&self) -> usize {
        self.inserted + self.replaced + self.tags_added + self.revlog_added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let local = Record::new(1, 100, 5);
        let older = Record::new(1, 90, -1);
        let same = Record::new(1, 100, -1);
        let newer = Record::new(1, 110, -1);

        let policy = MergePolicy::LastWriteWins;
        assert!(policy.should_replace(None, &older));
        assert!(!policy.should_replace(Some(&local), &older));
        assert!(!policy.should_replace(Some(&local), &same));
        assert!(policy.should_replace(Some(&local), &newer));
    }

    #[test]
    fn fixed_winners() {
        let local = Record::new(1, 100, 5);
        let newer = Record::new(1, 110, -1);

        assert!(!MergePolicy::ServerWins.should_replace(Some(&local), &newer));
        assert!(MergePolicy::ServerWins.should_replace(None, &newer));
        assert!(MergePolicy::ClientWins.should_replace(Some(&newer), &local));
    }

    #[test]
    fn policy_names() {
        for policy in [
            MergePolicy::LastWriteWins,
            MergePolicy::ServerWins,
            MergePolicy::ClientWins,
        ] {
            assert_eq!(policy.to_string().parse::<MergePolicy>(), Ok(policy));
        }
        assert!("newest".parse::<MergePolicy>().is_err());
        assert_eq!(MergePolicy::default(), MergePolicy::LastWriteWins);
    }
}
