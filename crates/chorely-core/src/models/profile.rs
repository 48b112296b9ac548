//! Profile and settings models

use serde::{Deserialize, Serialize};

use super::record::new_record_id;

/// A household member who completes tasks and redeems rewards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Profile {
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            display_name: display_name.into(),
            avatar: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Household display preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub id: String,
    /// Label used for points in the UI (e.g. "stars")
    pub points_label: String,
    /// 0 = Sunday, 1 = Monday
    #[serde(default)]
    pub week_starts_on: u8,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for Settings {
    fn default() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            points_label: "points".to_string(),
            week_starts_on: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-account settings; exactly one row per owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub id: String,
    pub timezone: String,
    #[serde(default)]
    pub notifications_enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            timezone: "UTC".to_string(),
            notifications_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.points_label, "points");
        assert_eq!(settings.week_starts_on, 1);
    }
}
