//! Reward and redemption models

use serde::{Deserialize, Serialize};

use super::record::new_record_id;

/// Something points can be spent on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub id: String,
    pub title: String,
    /// Price in points
    pub cost: i64,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Reward {
    #[must_use]
    pub fn new(title: impl Into<String>, cost: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            title: title.into(),
            cost,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A reward claimed by a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: String,
    pub reward_id: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    /// Points spent, frozen at redemption time
    #[serde(default)]
    pub cost: i64,
    pub redeemed_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Redemption {
    #[must_use]
    pub fn of(reward: &Reward, profile_id: Option<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: new_record_id(),
            reward_id: reward.id.clone(),
            profile_id,
            cost: reward.cost,
            redeemed_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
