//! File-based attachment store.
//!
//! Bytes live in the upload directory under a UUID-prefixed name; capsules
//! only hold an [`AttachmentRef`] to them.

use capsule_core::error::{Result, TransportError};
use capsule_core::types::AttachmentRef;
use std::path::{Path, PathBuf};

/// Owns the upload directory.
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    /// Create the store, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Store `bytes` under a unique name derived from `filename`.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<AttachmentRef> {
        let display = sanitize_filename(filename);
        let path = self
            .dir
            .join(format!("{}_{}", uuid::Uuid::new_v4(), display));
        std::fs::write(&path, bytes)?;
        tracing::info!("📎 Attachment saved: {} ({} bytes)", path.display(), bytes.len());
        Ok(AttachmentRef {
            path,
            filename: display,
        })
    }

    /// Read referenced content. Any failure is an `AttachmentMissing`
    /// transport error so the delivery fails instead of going out without it.
    pub async fn read(
        &self,
        reference: &AttachmentRef,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        tokio::fs::read(&reference.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::AttachmentMissing(format!(
                    "'{}' not found at {}",
                    reference.filename,
                    reference.path.display()
                ))
            } else {
                TransportError::AttachmentMissing(format!(
                    "'{}' could not be read: {e}",
                    reference.filename
                ))
            }
        })
    }

    /// Best-effort removal. Returns whether the content is gone afterwards.
    pub fn release(&self, reference: &AttachmentRef) -> bool {
        match std::fs::remove_file(&reference.path) {
            Ok(()) => {
                tracing::info!("Deleted attachment file: {}", reference.path.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(
                    "⚠️ Failed to delete attachment file {}: {e}",
                    reference.path.display()
                );
                false
            }
        }
    }

    /// Whether the referenced file exists inside the upload directory.
    pub fn contains(&self, reference: &AttachmentRef) -> bool {
        let (Ok(dir), Ok(file)) = (self.dir.canonicalize(), reference.path.canonicalize()) else {
            return false;
        };
        file.starts_with(&dir) && file.is_file()
    }
}

/// Reduce an uploaded filename to a safe basename: ASCII letters, digits,
/// `.`, `-`, `_`; whitespace becomes `_`; no leading dots.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(['.', '_']);
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("capsule-attach-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\my file.txt"), "my_file.txt");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("日本語"), "attachment");
    }

    #[tokio::test]
    async fn test_save_read_release() {
        let dir = scratch();
        let store = AttachmentStore::new(&dir).unwrap();
        let reference = store.save("note.txt", b"remember").unwrap();

        assert_eq!(reference.filename, "note.txt");
        assert!(reference.path.starts_with(&dir));
        assert!(store.contains(&reference));
        assert_eq!(store.read(&reference).await.unwrap(), b"remember");

        assert!(store.release(&reference));
        assert!(!reference.path.exists());
        // releasing twice is fine
        assert!(store.release(&reference));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_read_missing_is_attachment_missing() {
        let dir = scratch();
        let store = AttachmentStore::new(&dir).unwrap();
        let reference = AttachmentRef {
            path: dir.join("nope.bin"),
            filename: "nope.bin".into(),
        };
        let err = store.read(&reference).await.unwrap_err();
        assert!(matches!(err, TransportError::AttachmentMissing(_)));
        assert!(err.to_string().contains("attachment missing"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_contains_rejects_outside_paths() {
        let dir = scratch();
        let store = AttachmentStore::new(&dir).unwrap();
        let outside_dir = scratch();
        std::fs::create_dir_all(&outside_dir).unwrap();
        let outside = outside_dir.join("secret.txt");
        std::fs::write(&outside, b"x").unwrap();

        let reference = AttachmentRef {
            path: outside,
            filename: "secret.txt".into(),
        };
        assert!(!store.contains(&reference));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::remove_dir_all(&outside_dir).ok();
    }
}
