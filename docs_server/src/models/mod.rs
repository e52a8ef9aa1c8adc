//! Queue data models.

pub mod build;
pub mod project;
pub mod version;
