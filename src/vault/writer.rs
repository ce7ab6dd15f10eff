//! Atomic markdown I/O with per-path write serialization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::frontmatter::{self, Frontmatter};
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};

/// Bounded content scan per file during body search.
const SEARCH_SCAN_LIMIT: usize = 64 * 1024;

/// Listing order for notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Newest,
    Oldest,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Listing entry for a note file.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NoteInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

/// Scoped markdown I/O over the vault root.
///
/// Writes on the same filename are serialized by a per-path lock so appends
/// never tear; different files proceed in parallel. All replacements go
/// through a temp file + rename in the same directory.
#[derive(Clone)]
pub struct NotebookVault {
    root: PathBuf,
    logs_dir: PathBuf,
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl NotebookVault {
    /// Create a vault over the configured root.
    pub fn new(config: &VaultConfig) -> Self {
        Self {
            root: config.root.clone(),
            logs_dir: config.logs_dir(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The vault root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the vault root (and logs folder) exist and are writable.
    pub async fn ensure_root(&self) -> VaultResult<()> {
        for dir in [&self.root, &self.logs_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| VaultError::RootUnavailable {
                    path: dir.display().to_string(),
                    message: e.to_string(),
                })?;
        }
        // Probe writability; create_dir_all succeeds on read-only mounts that
        // already contain the directory.
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        tokio::fs::write(&probe, b"")
            .await
            .map_err(|e| VaultError::RootUnavailable {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?;
        let _ = tokio::fs::remove_file(&probe).await;
        Ok(())
    }

    /// Atomically replace a note, prepending frontmatter when given.
    pub async fn write(
        &self,
        name: &str,
        body: &str,
        fm: Option<&Frontmatter>,
    ) -> VaultResult<PathBuf> {
        let path = self.note_path(name)?;
        let mut content = String::new();
        if let Some(fm) = fm {
            if !fm.is_empty() {
                content.push_str(&frontmatter::format(fm));
                content.push('\n');
            }
        }
        content.push_str(body);

        let _guard = self.lock_for(&path).await;
        self.replace_atomic(&path, &content).await?;
        debug!(name = %name, bytes = content.len(), "Note written");
        Ok(path)
    }

    /// Append to a note with a blank-line separator, creating it when absent.
    pub async fn append(&self, name: &str, body: &str) -> VaultResult<PathBuf> {
        let path = self.note_path(name)?;
        let _guard = self.lock_for(&path).await;

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(VaultError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        let content = if existing.is_empty() {
            body.to_string()
        } else {
            format!("{}\n\n{}", existing.trim_end_matches('\n'), body)
        };

        self.replace_atomic(&path, &content).await?;
        Ok(path)
    }

    /// Read a note, split into frontmatter and body.
    pub async fn read(&self, name: &str) -> VaultResult<(Frontmatter, String)> {
        let path = self.note_path(name)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => {
                return Err(VaultError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        Ok(frontmatter::split_document(&text))
    }

    /// List up to `limit` notes sorted by modification time.
    pub async fn list(&self, limit: usize, order: SortOrder) -> VaultResult<Vec<NoteInfo>> {
        let mut entries = self.scan_notes().await?;
        entries.sort_by(|a, b| match order {
            SortOrder::Newest => b.2.cmp(&a.2),
            SortOrder::Oldest => a.2.cmp(&b.2),
        });
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(name, size, modified)| NoteInfo {
                name,
                size,
                modified_at: modified.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            })
            .collect())
    }

    /// Search notes by filename, optionally scanning bodies (bounded).
    pub async fn search(&self, text: &str, search_body: bool) -> VaultResult<Vec<String>> {
        let needle = text.to_lowercase();
        let mut matches = Vec::new();

        for (name, _, _) in self.scan_notes().await? {
            if name.to_lowercase().contains(&needle) {
                matches.push(name);
                continue;
            }
            if search_body {
                let path = self.root.join(&name);
                if let Ok(bytes) = tokio::fs::read(&path).await {
                    let slice = &bytes[..bytes.len().min(SEARCH_SCAN_LIMIT)];
                    let content = String::from_utf8_lossy(slice).to_lowercase();
                    if content.contains(&needle) {
                        matches.push(name);
                    }
                }
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Append a rendered block to today's log file, creating it with the
    /// standard frontmatter when absent.
    pub async fn append_daily_log(&self, block: &str) -> VaultResult<PathBuf> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let path = self.logs_dir.join(format!("Log_Global_{}.md", date));
        let _guard = self.lock_for(&path).await;

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let fm = Frontmatter::new()
                    .with("date", json!(date))
                    .with("cli", json!("all-clients"))
                    .with("version", json!(env!("CARGO_PKG_VERSION")));
                format!("{}\n# Global Action Log\n", frontmatter::format(&fm))
            }
            Err(e) => {
                return Err(VaultError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        let content = format!("{}\n\n{}", existing.trim_end_matches('\n'), block);
        self.replace_atomic(&path, &content).await?;
        Ok(path)
    }

    /// Path of today's log file (used by verification and tests).
    pub fn daily_log_path(&self) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        self.logs_dir.join(format!("Log_Global_{}.md", date))
    }

    async fn scan_notes(&self) -> VaultResult<Vec<(String, u64, chrono::DateTime<Utc>)>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VaultError::Io {
                    path: self.root.display().to_string(),
                    source: e,
                })
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".md") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .map(chrono::DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            entries.push((name, meta.len(), modified));
        }
        Ok(entries)
    }

    fn note_path(&self, name: &str) -> VaultResult<PathBuf> {
        if name.trim().is_empty() {
            return Err(VaultError::InvalidName {
                name: name.to_string(),
                reason: "name is empty".to_string(),
            });
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(VaultError::InvalidName {
                name: name.to_string(),
                reason: "path separators are not allowed".to_string(),
            });
        }
        let file = if name.ends_with(".md") {
            name.to_string()
        } else {
            format!("{}.md", name)
        };
        Ok(self.root.join(file))
    }

    async fn lock_for(&self, path: &Path) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn replace_atomic(&self, path: &Path, content: &str) -> VaultResult<()> {
        let dir = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| VaultError::RootUnavailable {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;

        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| VaultError::Io {
                path: tmp.display().to_string(),
                source: e,
            })?;

        match tokio::fs::rename(&tmp, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Atomic rename failed");
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(VaultError::Io {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;

    fn vault_at(root: &Path) -> NotebookVault {
        NotebookVault::new(&VaultConfig {
            root: root.to_path_buf(),
            logs_folder: None,
        })
    }

    #[test]
    fn test_note_path_rejects_traversal() {
        let vault = vault_at(Path::new("/tmp/vault"));
        assert!(vault.note_path("../escape").is_err());
        assert!(vault.note_path("a/b").is_err());
        assert!(vault.note_path("a\\b").is_err());
        assert!(vault.note_path("").is_err());
    }

    #[test]
    fn test_note_path_appends_extension() {
        let vault = vault_at(Path::new("/tmp/vault"));
        assert_eq!(
            vault.note_path("daily").unwrap(),
            PathBuf::from("/tmp/vault/daily.md")
        );
        assert_eq!(
            vault.note_path("daily.md").unwrap(),
            PathBuf::from("/tmp/vault/daily.md")
        );
    }

    #[test]
    fn test_sort_order_from_str() {
        assert_eq!("newest".parse::<SortOrder>().unwrap(), SortOrder::Newest);
        assert_eq!("OLDEST".parse::<SortOrder>().unwrap(), SortOrder::Oldest);
        assert!("middle".parse::<SortOrder>().is_err());
    }
}
