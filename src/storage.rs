use anyhow::Context;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// On-disk artifact store.
///
/// Every upload gets a fresh path (random leaf, per-upload epoch segment), so
/// nothing under the base directory is ever overwritten. The size cap is
/// enforced against the bytes actually written, not the declared length.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_path: PathBuf,
    max_upload_bytes: u64,
}

impl ArtifactStore {
    pub fn new(base_path: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        ArtifactStore {
            base_path: base_path.into(),
            max_upload_bytes,
        }
    }

    /// Random leaf name keeping the uploaded file's extension.
    fn unique_leaf(filename: &str) -> String {
        match Path::new(filename).extension() {
            Some(extension) => format!("{}.{}", Uuid::new_v4(), extension.to_string_lossy()),
            None => Uuid::new_v4().to_string(),
        }
    }

    pub fn release_path(
        &self,
        org_id: i32,
        course_code: &str,
        assignment_code: &str,
        filename: &str,
    ) -> PathBuf {
        self.base_path
            .join(org_id.to_string())
            .join("released")
            .join(course_code)
            .join(assignment_code)
            .join(Self::unique_leaf(filename))
    }

    pub fn submission_path(
        &self,
        org_id: i32,
        course_code: &str,
        assignment_code: &str,
        username: &str,
        filename: &str,
    ) -> PathBuf {
        self.base_path
            .join(org_id.to_string())
            .join("submitted")
            .join(course_code)
            .join(assignment_code)
            .join(username)
            .join(Utc::now().timestamp().to_string())
            .join(Self::unique_leaf(filename))
    }

    pub fn feedback_path(
        &self,
        org_id: i32,
        course_code: &str,
        assignment_code: &str,
        checksum: &str,
    ) -> PathBuf {
        self.base_path
            .join(org_id.to_string())
            .join("feedback")
            .join(course_code)
            .join(assignment_code)
            .join(Utc::now().timestamp().to_string())
            .join(format!("{checksum}.html"))
    }

    /// Writes an artifact unconditionally.
    pub fn write(&self, path: &Path, body: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create artifact directory {parent:?}"))?;
        }
        fs::write(path, body).with_context(|| format!("Failed to write artifact {path:?}"))?;
        info!("Stored artifact at {:?} ({} bytes)", path, body.len());
        Ok(())
    }

    /// Writes an artifact, then verifies its on-disk size against the cap.
    ///
    /// Returns `Ok(false)` when the file was oversize: the artifact has been
    /// removed and the caller must not record an action for it.
    pub fn write_checked(&self, path: &Path, body: &[u8]) -> anyhow::Result<bool> {
        self.write(path, body)?;

        let written = fs::metadata(path)
            .with_context(|| format!("Failed to stat artifact {path:?}"))?
            .len();
        if written > self.max_upload_bytes {
            warn!(
                "Artifact {:?} is oversize ({} > {} bytes), removing",
                path, written, self.max_upload_bytes
            );
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove oversize artifact {path:?}"))?;
            return Ok(false);
        }
        Ok(true)
    }

    pub fn read(&self, location: &str) -> anyhow::Result<Vec<u8>> {
        fs::read(location).with_context(|| format!("Failed to read artifact {location:?}"))
    }
}
