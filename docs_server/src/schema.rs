//! Diesel table definitions for the build queue.
//!
//! Tables: projects, builds, versions.

diesel::table! {
    projects (id) {
        id -> Int8,
        slug -> Varchar,
        name -> Varchar,
        source_url -> Varchar,
        docker_image -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    builds (id) {
        id -> Int8,
        project_id -> Int8,
        source_ref -> Varchar,
        tag -> Varchar,
        status -> Varchar,
        logs -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    versions (id) {
        id -> Int8,
        project_id -> Int8,
        build_id -> Int8,
        tag -> Varchar,
        published -> Bool,
        is_latest -> Bool,
        created_at -> Timestamptz,
    }
}

// Foreign key relationships
diesel::joinable!(builds -> projects (project_id));
diesel::joinable!(versions -> projects (project_id));
diesel::joinable!(versions -> builds (build_id));

diesel::allow_tables_to_appear_in_same_query!(projects, builds, versions);
