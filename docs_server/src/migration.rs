//! Schema migration for the build queue tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// Idempotent SQL executed at startup.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id              BIGSERIAL PRIMARY KEY,
    slug            VARCHAR(128) NOT NULL UNIQUE,
    name            VARCHAR(255) NOT NULL,
    source_url      VARCHAR(1024) NOT NULL,
    docker_image    VARCHAR(512) NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS builds (
    id              BIGSERIAL PRIMARY KEY,
    project_id      BIGINT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    source_ref      VARCHAR(255) NOT NULL DEFAULT '',
    tag             VARCHAR(255) NOT NULL DEFAULT '',
    status          VARCHAR(16) NOT NULL DEFAULT 'pending',
    logs            TEXT,
    error           TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at      TIMESTAMPTZ,
    finished_at     TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_builds_project ON builds (project_id);
CREATE INDEX IF NOT EXISTS idx_builds_pending ON builds (created_at) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS versions (
    id              BIGSERIAL PRIMARY KEY,
    project_id      BIGINT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    build_id        BIGINT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
    tag             VARCHAR(255) NOT NULL,
    published       BOOLEAN NOT NULL DEFAULT FALSE,
    is_latest       BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_versions_project_tag UNIQUE (project_id, tag)
);
"#;

/// Run the queue migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("queue migration failed: {e}"))?;
    Ok(())
}
