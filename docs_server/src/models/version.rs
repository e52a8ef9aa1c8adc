//! version: A published build output addressable by tag.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::versions;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = versions)]
pub struct Version {
    pub id: i64,
    pub project_id: i64,
    pub build_id: i64,
    #[serde(rename = "version")]
    pub tag: String,
    pub published: bool,
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = versions)]
pub struct NewVersion {
    pub project_id: i64,
    pub build_id: i64,
    pub tag: String,
    pub published: bool,
}

impl NewVersion {
    /// Versions created by a successful build are published immediately.
    /// Promotion to latest is a separate, explicit step.
    pub fn published(project_id: i64, build_id: i64, tag: String) -> Self {
        Self {
            project_id,
            build_id,
            tag,
            published: true,
        }
    }
}

/// Partial update of a version's flags. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, AsChangeset)]
#[diesel(table_name = versions)]
pub struct VersionUpdate {
    pub published: Option<bool>,
    pub is_latest: Option<bool>,
}

impl VersionUpdate {
    pub fn is_empty(&self) -> bool {
        self.published.is_none() && self.is_latest.is_none()
    }

    /// Whether applying this update makes the version the project's latest.
    pub fn promotes(&self) -> bool {
        self.is_latest == Some(true)
    }

    /// Apply the update in place, for backends without a changeset.
    pub fn apply(&self, version: &mut Version) {
        if let Some(published) = self.published {
            version.published = published;
        }
        if let Some(is_latest) = self.is_latest {
            version.is_latest = is_latest;
        }
    }
}
