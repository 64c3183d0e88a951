//! Path resolver: chooses a project-local vs. user-global storage root and
//! creates directories idempotently.

use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

const MARKER_DIR: &str = ".dexto";

/// Options used to resolve a storage root. Immutable once built into a
/// [`StorageContext`].
#[derive(Debug, Clone, Default)]
pub struct StorageContextOptions {
    pub custom_root: Option<PathBuf>,
    pub force_global: bool,
    pub is_development: bool,
    pub project_root: Option<PathBuf>,
}

/// Immutable storage context shared by every backend/provider created from
/// the same manager.
#[derive(Debug, Clone)]
pub struct StorageContext {
    pub storage_root: PathBuf,
    pub is_development: bool,
    pub project_root: Option<PathBuf>,
    pub force_global: bool,
    pub custom_root: Option<PathBuf>,
}

impl StorageContext {
    /// Resolves the storage root by precedence (custom root, forced global,
    /// project-local, user-global) and creates it — does not silently fall
    /// back on failure to create the chosen root.
    pub fn resolve(opts: StorageContextOptions) -> StorageResult<Self> {
        let root = if let Some(custom) = &opts.custom_root {
            custom.clone()
        } else if opts.force_global {
            global_root()?
        } else if opts.is_development || opts.project_root.as_deref().is_some_and(writable_dir) {
            match &opts.project_root {
                Some(p) => p.join(MARKER_DIR),
                None => global_root()?,
            }
        } else {
            global_root()?
        };

        create_dir_idempotent(&root)?;

        Ok(Self {
            storage_root: root,
            is_development: opts.is_development,
            project_root: opts.project_root,
            force_global: opts.force_global,
            custom_root: opts.custom_root,
        })
    }

    /// Sub-path for a given storage purpose/namespace (e.g. `history`,
    /// `sessions`, `sqlite`).
    pub fn sub_path(&self, namespace: &str) -> PathBuf {
        self.storage_root.join(namespace)
    }
}

fn global_root() -> StorageResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StorageError::Configuration("could not resolve home directory".into()))?;
    Ok(home.join(MARKER_DIR))
}

fn writable_dir(path: &Path) -> bool {
    path.join(MARKER_DIR).exists() || path.exists()
}

fn create_dir_idempotent(path: &Path) -> StorageResult<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(StorageError::Connection(format!(
            "failed to create storage root {}: {e}",
            path.display()
        ))),
    }
}

/// Walks upward from `start` looking for a `.dexto` marker directory or a
/// manifest declaring a dependency on this system.
pub fn detect_project_root(start: &Path, manifest_names: &[&str]) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(MARKER_DIR).is_dir() {
            return Some(dir.to_path_buf());
        }
        if manifest_names.iter().any(|name| dir.join(name).is_file()) {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}
