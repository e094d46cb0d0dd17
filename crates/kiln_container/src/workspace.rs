//! Private per-execution workspace.

use std::path::{Path, PathBuf};

use kiln_core::LanguageProfile;
use tempfile::TempDir;

use crate::error::ContainerError;

/// File holding the execution's standard input, when it has one
pub const STDIN_FILE: &str = ".stdin";

/// Temporary directory holding the materialized source
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    file_name: String,
    has_input: bool,
}

impl Workspace {
    /// Create the directory and write the source under the profile's file
    /// name, plus the standard input if any.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or files cannot be written
    pub async fn materialize(
        profile: &LanguageProfile,
        code: &str,
        input: Option<&str>,
    ) -> Result<Self, ContainerError> {
        let dir = tempfile::Builder::new().prefix("kiln-").tempdir()?;
        let file_name = profile.file_name();
        tokio::fs::write(dir.path().join(&file_name), code).await?;
        if let Some(input) = input {
            tokio::fs::write(dir.path().join(STDIN_FILE), input).await?;
        }
        open_for_unit(dir.path()).await?;
        Ok(Self {
            dir,
            file_name,
            has_input: input.is_some(),
        })
    }

    /// Host path of the workspace
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host path of the source file
    #[must_use]
    pub fn source_path(&self) -> PathBuf {
        self.dir.path().join(&self.file_name)
    }

    /// Whether a standard input file was written
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.has_input
    }

    /// Delete the workspace
    ///
    /// # Errors
    ///
    /// Returns error if removal fails
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// The unit runs as an unprivileged user, so the directory and its files
/// must be world-readable.
#[cfg(unix)]
async fn open_for_unit(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        tokio::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn open_for_unit(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Language;

    #[tokio::test]
    async fn test_materialize_fixed_name() {
        let ws = Workspace::materialize(Language::Python.profile(), "print(1)", None)
            .await
            .unwrap();
        assert!(ws.path().file_name().unwrap().to_string_lossy().starts_with("kiln-"));
        assert_eq!(ws.source_path().file_name().unwrap(), "main.py");
        assert_eq!(std::fs::read_to_string(ws.source_path()).unwrap(), "print(1)");
        assert!(!ws.has_input());
    }

    #[tokio::test]
    async fn test_materialize_type_name_and_input() {
        let ws = Workspace::materialize(Language::Java.profile(), "class Main {}", Some("42\n"))
            .await
            .unwrap();
        assert_eq!(ws.source_path().file_name().unwrap(), "Main.java");
        assert!(ws.has_input());
        assert_eq!(std::fs::read_to_string(ws.path().join(STDIN_FILE)).unwrap(), "42\n");
    }

    #[tokio::test]
    async fn test_close_removes_directory() {
        let ws = Workspace::materialize(Language::Bash.profile(), "echo hi", None)
            .await
            .unwrap();
        let path = ws.path().to_path_buf();
        ws.close().unwrap();
        assert!(!path.exists());
    }
}
