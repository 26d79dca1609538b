use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;

/// Gamified user profile, linked to the identity provider by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile_pict: Option<String>,

    pub level: u32,
    pub experience: u64,
    pub points: u64,
    /// Achievement name -> grant time. The first grant is never overwritten.
    #[serde(default, alias = "achivements")]
    pub achievements: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub sessions_finished: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            email: String::new(),
            profile_pict: None,
            level: 1,
            experience: 0,
            points: 0,
            achievements: BTreeMap::new(),
            sessions_finished: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn has_achievement(&self, name: &str) -> bool {
        self.achievements.contains_key(name)
    }
}

/// Authenticated caller, as resolved by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
    pub profile_pict: Option<String>,
}

impl Requester {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            profile_pict: None,
        }
    }
}
