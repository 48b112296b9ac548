//! Entity kinds known to the sync engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of business record the engine synchronizes.
///
/// Declaration order is the push priority: parents come before the children
/// that reference them by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Profile,
    Settings,
    AccountSettings,
    Task,
    Reward,
    Completion,
    Redemption,
}

impl EntityKind {
    /// Every kind, in push priority order.
    pub const ALL: [Self; 7] = [
        Self::Profile,
        Self::Settings,
        Self::AccountSettings,
        Self::Task,
        Self::Reward,
        Self::Completion,
        Self::Redemption,
    ];

    /// Lower values are pushed first.
    pub const fn push_priority(self) -> u8 {
        match self {
            Self::Profile => 0,
            Self::Settings => 1,
            Self::AccountSettings => 2,
            Self::Task => 3,
            Self::Reward => 4,
            Self::Completion => 5,
            Self::Redemption => 6,
        }
    }

    /// Table name, shared by the local store and the remote backend.
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Profile => "profiles",
            Self::Settings => "settings",
            Self::AccountSettings => "account_settings",
            Self::Task => "tasks",
            Self::Reward => "rewards",
            Self::Completion => "completions",
            Self::Redemption => "redemptions",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Settings => "settings",
            Self::AccountSettings => "account_settings",
            Self::Task => "task",
            Self::Reward => "reward",
            Self::Completion => "completion",
            Self::Redemption => "redemption",
        }
    }

    /// Singleton kinds hold at most one row per owner.
    pub const fn is_singleton(self) -> bool {
        matches!(self, Self::AccountSettings)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.table_name() == s)
            .ok_or_else(|| format!("unknown entity kind '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_sorted_by_push_priority() {
        let priorities: Vec<u8> = EntityKind::ALL.iter().map(|k| k.push_priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn parents_push_before_children() {
        assert!(EntityKind::Profile.push_priority() < EntityKind::Task.push_priority());
        assert!(EntityKind::Task.push_priority() < EntityKind::Completion.push_priority());
        assert!(EntityKind::Reward.push_priority() < EntityKind::Redemption.push_priority());
    }

    #[test]
    fn parses_kind_and_table_names() {
        assert_eq!("task".parse::<EntityKind>().unwrap(), EntityKind::Task);
        assert_eq!("tasks".parse::<EntityKind>().unwrap(), EntityKind::Task);
        assert_eq!(
            "account_settings".parse::<EntityKind>().unwrap(),
            EntityKind::AccountSettings
        );
        assert!("notes".parse::<EntityKind>().is_err());
    }
}
