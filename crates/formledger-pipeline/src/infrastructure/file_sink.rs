//! Filesystem output sink: one JSON file per event under a directory per
//! processor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use formledger_core::error::LedgerError;
use formledger_core::event::EventId;
use formledger_core::sink::{Artifact, OutputSink, WriteOutcome};

fn io_error(context: &str, path: &Path, err: &std::io::Error) -> LedgerError {
    LedgerError::Infrastructure(format!("{context} {}: {err}", path.display()))
}

/// Writes artifacts to `<root>/<processor_id>/<artifact file name>`.
///
/// Files are written to a temporary name and renamed into place, so a
/// reader never sees a partial artifact.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where `artifact` is (or would be) written.
    #[must_use]
    pub fn path_for(&self, artifact: &Artifact) -> PathBuf {
        self.root
            .join(&artifact.processor_id)
            .join(artifact.file_name())
    }
}

#[async_trait]
impl OutputSink for FileSink {
    #[tracing::instrument(skip_all, fields(processor_id = %artifact.processor_id, event_id = %artifact.event_id))]
    async fn write(
        &self,
        artifact: &Artifact,
        committed_through: Option<EventId>,
    ) -> Result<WriteOutcome, LedgerError> {
        artifact.ensure_pending(committed_through)?;

        let path = self.path_for(artifact);
        let dir = self.root.join(&artifact.processor_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("cannot create", &dir, &e))?;

        let existed = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("cannot stat", &path, &e))?;

        let body = serde_json::to_vec_pretty(&artifact.body)
            .map_err(|e| LedgerError::Infrastructure(format!("cannot encode artifact: {e}")))?;
        let staging = dir.join(format!(".{}.tmp", artifact.file_name()));
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| io_error("cannot write", &staging, &e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error("cannot move into place", &path, &e))?;

        if existed {
            tracing::warn!(path = %path.display(), "replaced artifact left by an unacknowledged attempt");
            Ok(WriteOutcome::Replaced)
        } else {
            Ok(WriteOutcome::Written)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn artifact(id: i64, body: serde_json::Value) -> Artifact {
        Artifact {
            processor_id: "archive".into(),
            event_id: EventId::new(id),
            event_created_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 5).unwrap(),
            body,
        }
    }

    #[tokio::test]
    async fn test_write_creates_named_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let artifact = artifact(7, json!({"name": "Ada"}));

        // Act
        let outcome = sink.write(&artifact, Some(EventId::new(6))).await.unwrap();

        // Assert
        assert_eq!(outcome, WriteOutcome::Written);
        let path = dir
            .path()
            .join("archive")
            .join("20260115T103005000000Z-000000000007.json");
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(written, json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_rewrite_of_uncommitted_event_replaces() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        sink.write(&artifact(1, json!({"attempt": 1})), None).await.unwrap();

        // Act
        let outcome = sink.write(&artifact(1, json!({"attempt": 2})), None).await.unwrap();

        // Assert
        assert_eq!(outcome, WriteOutcome::Replaced);
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(sink.path_for(&artifact(1, json!(null)))).unwrap())
                .unwrap();
        assert_eq!(written, json!({"attempt": 2}));
    }

    #[tokio::test]
    async fn test_rewrite_of_committed_event_is_output_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        let result = sink.write(&artifact(4, json!({})), Some(EventId::new(4))).await;

        assert!(matches!(
            result,
            Err(LedgerError::OutputConflict { event_id, .. }) if event_id == EventId::new(4)
        ));
        assert!(!dir.path().join("archive").exists());
    }
}
