use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::SandboxError;

const WORKSPACE_PREFIX: &str = "java_";
#[cfg(unix)]
const WORKSPACE_PERMISSIONS: u32 = 0o700;

/// Scratch directory owned by a single request
///
/// The directory is removed when the value is dropped, so every exit path of
/// the owning request cleans up, including early returns through `?`.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    created_at: DateTime<Utc>,
    destroyed: bool,
}

impl Workspace {
    /// Creates a fresh, uniquely named directory under `scratch_root`
    pub async fn create(scratch_root: &Path) -> Result<Self, SandboxError> {
        let id = Uuid::new_v4();
        let root = scratch_root.join(format!("{WORKSPACE_PREFIX}{id}"));

        tokio::fs::create_dir_all(scratch_root)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: root.clone(),
                source,
            })?;
        // Not create_dir_all: an existing directory means a collision.
        tokio::fs::create_dir(&root)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: root.clone(),
                source,
            })?;

        let workspace = Self {
            id,
            root,
            created_at: Utc::now(),
            destroyed: false,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &workspace.root,
                fs::Permissions::from_mode(WORKSPACE_PERMISSIONS),
            )
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: workspace.root.clone(),
                source,
            })?;
        }

        log::debug!("Workspace {} created at {}", id, workspace.root.display());
        Ok(workspace)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Writes `content` to `file_name` inside the workspace
    pub async fn write_source(&self, file_name: &str, content: &str) -> Result<PathBuf, SandboxError> {
        let path = self.root.join(file_name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| SandboxError::WorkspaceWrite {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Recursively removes the workspace directory
    ///
    /// Idempotent. Failures are logged and swallowed so they never mask the
    /// outcome of the request.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match fs::remove_dir_all(&self.root) {
            Ok(()) => log::debug!(
                "Workspace {} removed after {} ms",
                self.id,
                (Utc::now() - self.created_at).num_milliseconds()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove workspace {} at {}: {e}",
                self.id,
                self.root.display()
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.destroy();
    }
}
