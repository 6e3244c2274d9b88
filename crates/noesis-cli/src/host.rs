//! Host editor backed by stdout and the filesystem.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use noesis_core::{Error, Result};
use noesis_discovery::{ActiveDocument, HostEditor};

/// Prints inserted text and writes created documents under `root`.
pub struct CliHost {
    root: PathBuf,
    active: Option<PathBuf>,
}

impl CliHost {
    pub fn new(root: impl Into<PathBuf>, active: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Vault-relative `/`-separated form of a path under the root.
    fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => path.display().to_string(),
        }
    }
}

#[async_trait]
impl HostEditor for CliHost {
    async fn active_document(&self) -> Result<Option<ActiveDocument>> {
        let Some(active) = &self.active else {
            return Ok(None);
        };
        let full = self.resolve(active);
        let content = tokio::fs::read_to_string(&full).await?;
        Ok(Some(ActiveDocument {
            path: self.relative(&full),
            content,
        }))
    }

    async fn insert_at_cursor(&self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", text)?;
        stdout.flush()?;
        Ok(())
    }

    async fn create_document(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(Path::new(path));
        if tokio::fs::try_exists(&full).await? {
            return Err(Error::Host(format!("{} already exists", full.display())));
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_active_document_is_vault_relative() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("daily")).unwrap();
        std::fs::write(dir.path().join("daily/today.md"), "# Today").unwrap();

        let host = CliHost::new(dir.path(), Some(PathBuf::from("daily/today.md")));
        let active = host.active_document().await.unwrap().unwrap();
        assert_eq!(active.path, "daily/today.md");
        assert_eq!(active.content, "# Today");

        let absolute = CliHost::new(dir.path(), Some(dir.path().join("daily/today.md")));
        assert_eq!(absolute.active_document().await.unwrap().unwrap().path, "daily/today.md");

        assert!(CliHost::new(dir.path(), None).active_document().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_document_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let host = CliHost::new(dir.path(), None);

        host.create_document("answers/tokio.md", "first").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("answers/tokio.md")).unwrap(),
            "first"
        );

        let err = host.create_document("answers/tokio.md", "second").await.unwrap_err();
        assert!(matches!(err, Error::Host(_)));
    }
}
