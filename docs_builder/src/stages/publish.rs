//! Publish: upload every produced file to the artifact store.
//!
//! Objects land at `<project-slug>/<version>/<relative-path>` with forward
//! slashes whatever the host platform. The first failing file aborts the
//! stage; files already stored are left in place.

use std::path::{Component, Path, PathBuf};

use opendal::Operator;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("put {key}: {source}")]
    Put { key: String, source: opendal::Error },
}

pub fn object_key(project_slug: &str, version: &str, relative: &Path) -> String {
    let mut key = format!("{project_slug}/{version}");
    for component in relative.components() {
        if let Component::Normal(part) = component {
            key.push('/');
            key.push_str(&part.to_string_lossy());
        }
    }
    key
}

/// Content type from the file extension, `application/octet-stream` when unknown.
pub fn content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Every regular file under `root`, sorted. Symlinks are skipped: they
/// resolve on the builder host, not inside the sandbox that created them.
pub async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, PublishError> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let walk_err = |source: std::io::Error| PublishError::Walk {
            path: dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(walk_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(walk_err)? {
            let file_type = entry.file_type().await.map_err(walk_err)?;
            if file_type.is_dir() {
                dirs.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            } else {
                tracing::debug!(path = %entry.path().display(), "Skipping non-regular file");
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Upload the contents of `output_dir`; returns the number of objects stored.
pub async fn run(
    store: &Operator,
    project_slug: &str,
    version: &str,
    output_dir: &Path,
) -> Result<usize, PublishError> {
    let files = collect_files(output_dir).await?;
    let typed = store.info().full_capability().write_with_content_type;
    if !typed {
        tracing::debug!(
            scheme = %store.info().scheme(),
            "Store cannot record content types, uploading without them"
        );
    }

    for path in &files {
        let relative = path.strip_prefix(output_dir).unwrap_or(path);
        let key = object_key(project_slug, version, relative);
        let body = tokio::fs::read(path)
            .await
            .map_err(|source| PublishError::Read {
                path: path.clone(),
                source,
            })?;

        let written = if typed {
            store
                .write_with(&key, body)
                .content_type(&content_type(path))
                .await
        } else {
            store.write(&key, body).await
        };
        written.map_err(|source| PublishError::Put {
            key: key.clone(),
            source,
        })?;
        tracing::debug!(key = %key, "Stored artifact");
    }

    tracing::info!(
        project = project_slug,
        version,
        objects = files.len(),
        "Artifacts published"
    );
    Ok(files.len())
}


#[cfg(test)]
mod tests {
    use super::testing::{memory_store, stored_keys};
    use super::*;

    #[test]
    fn keys_use_forward_slashes() {
        let relative = Path::new("guide").join("install").join("index.html");
        assert_eq!(
            object_key("handbook", "v2.1.0", &relative),
            "handbook/v2.1.0/guide/install/index.html"
        );
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type(Path::new("index.html")), "text/html");
        assert_eq!(content_type(Path::new("assets/site.css")), "text/css");
        assert_eq!(content_type(Path::new("img/logo.png")), "image/png");
        assert_eq!(
            content_type(Path::new("objects.inv")),
            "application/octet-stream"
        );
        assert_eq!(content_type(Path::new("CNAME")), "application/octet-stream");
    }

    #[tokio::test]
    async fn uploads_the_whole_tree_under_slug_and_version() {
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(out.path().join("guide/install")).unwrap();
        std::fs::write(out.path().join("index.html"), "<h1>Handbook</h1>").unwrap();
        std::fs::write(out.path().join("guide/install/index.html"), "steps").unwrap();
        std::fs::write(out.path().join("search.json"), "{}").unwrap();

        let store = memory_store();
        let stored = run(&store, "handbook", "v1.0.0", out.path()).await.unwrap();

        assert_eq!(stored, 3);
        assert_eq!(
            stored_keys(&store).await,
            vec![
                "handbook/v1.0.0/guide/install/index.html",
                "handbook/v1.0.0/index.html",
                "handbook/v1.0.0/search.json",
            ]
        );
        let page = store.read("handbook/v1.0.0/index.html").await.unwrap();
        assert_eq!(page.to_vec(), b"<h1>Handbook</h1>");
    }

    #[tokio::test]
    async fn content_types_are_stored_when_the_store_supports_them() {
        use opendal::raw::Access;

        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("index.html"), "<h1>Handbook</h1>").unwrap();
        std::fs::write(out.path().join("objects.inv"), "inv").unwrap();

        let store = memory_store();
        store.inner().info().update_full_capability(|mut cap| {
            cap.write_with_content_type = true;
            cap
        });
        run(&store, "handbook", "v1.0.0", out.path()).await.unwrap();

        let page = store.stat("handbook/v1.0.0/index.html").await.unwrap();
        assert_eq!(page.content_type(), Some("text/html"));
        let inventory = store.stat("handbook/v1.0.0/objects.inv").await.unwrap();
        assert_eq!(inventory.content_type(), Some("application/octet-stream"));
    }

    #[tokio::test]
    async fn untyped_stores_still_receive_every_file() {
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("index.html"), "<h1>Handbook</h1>").unwrap();

        let store = memory_store();
        assert!(!store.info().full_capability().write_with_content_type);
        assert_eq!(run(&store, "handbook", "v1.0.0", out.path()).await.unwrap(), 1);

        let page = store.stat("handbook/v1.0.0/index.html").await.unwrap();
        assert_eq!(page.content_type(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_not_followed() {
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("index.html"), "ok").unwrap();
        std::os::unix::fs::symlink("/etc/hostname", out.path().join("leak.txt")).unwrap();

        let files = collect_files(out.path()).await.unwrap();
        assert_eq!(files, vec![out.path().join("index.html")]);
    }
}
