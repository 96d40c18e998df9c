use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use super::error::SandboxError;

/// A freshly created directory owned by exactly one compile or run step.
///
/// The directory and everything in it is removed when the value is dropped,
/// whichever way the step ends.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create an empty workspace under `root` (system temp dir when `None`).
    pub fn create(root: Option<&Path>) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("judge-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, SandboxError> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Copy every regular file of `other` into this workspace, keeping modes.
    pub async fn copy_files_from(&self, other: &Workspace) -> Result<(), SandboxError> {
        copy_files(other.path(), self.path(), |_| true).await
    }
}

/// Names of the regular files directly inside `dir`, sorted.
pub(crate) async fn list_files(dir: &Path) -> Result<Vec<String>, SandboxError> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Copy regular files from `from` to `to` whose name passes `keep`.
pub(crate) async fn copy_files(
    from: &Path,
    to: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<(), SandboxError> {
    for name in list_files(from).await? {
        if keep(&name) {
            fs::copy(from.join(&name), to.join(&name)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[tokio::test]
    async fn workspace_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(Some(root.path())).unwrap();
        let path = workspace.path().to_path_buf();
        workspace.write_file("main.py", b"print(1)").await.unwrap();
        assert!(path.join("main.py").exists());

        drop(workspace);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn copy_keeps_files_and_modes() {
        let build = Workspace::create(None).unwrap();
        let binary = build.write_file("main", b"#!/bin/sh\n").await.unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        build.write_file("main.c", b"int main(){}").await.unwrap();
        std::fs::create_dir(build.path().join("nested")).unwrap();

        let run = Workspace::create(None).unwrap();
        run.copy_files_from(&build).await.unwrap();

        assert_eq!(list_files(run.path()).await.unwrap(), ["main", "main.c"]);
        let mode = std::fs::metadata(run.path().join("main"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn workspaces_are_distinct() {
        let a = Workspace::create(None).unwrap();
        let b = Workspace::create(None).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
