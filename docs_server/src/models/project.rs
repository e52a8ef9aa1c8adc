//! project: A registered documentation source and the image that builds it.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::projects;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub source_url: String,
    pub docker_image: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub slug: String,
    pub name: String,
    pub source_url: String,
    pub docker_image: String,
}

/// Editable project fields. The slug is fixed once created, since published
/// artifacts are keyed by it.
#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = projects)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub source_url: Option<String>,
    pub docker_image: Option<String>,
}

impl ProjectUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.source_url.is_none() && self.docker_image.is_none()
    }

    pub fn apply(&self, project: &mut Project) {
        if let Some(name) = &self.name {
            project.name = name.clone();
        }
        if let Some(source_url) = &self.source_url {
            project.source_url = source_url.clone();
        }
        if let Some(docker_image) = &self.docker_image {
            project.docker_image = docker_image.clone();
        }
    }
}
