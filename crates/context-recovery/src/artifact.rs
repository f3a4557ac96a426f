use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// A compaction summary persisted as a text artifact under
/// `<workspace>/<runtime_dir>/runs/<run_id>/artifacts/`.
#[derive(Debug, Clone)]
pub struct SummaryArtifact {
    pub path: PathBuf,
    pub summary_len: usize,
    pub summary_sha256: String,
}

/// Write `summary` to `<artifacts_dir>/compaction_<index>.txt`, creating
/// the directory if needed. The filename is index-stamped so replay can
/// tell compactions in a run apart without inspecting contents.
pub fn write_summary_artifact(artifacts_dir: &Path, compaction_index: u32, summary: &str) -> io::Result<SummaryArtifact> {
    fs::create_dir_all(artifacts_dir)?;
    let path = artifacts_dir.join(format!("compaction_{compaction_index}.txt"));
    fs::write(&path, summary)?;

    let mut hasher = Sha256::new();
    hasher.update(summary.as_bytes());
    let summary_sha256 = hex::encode(hasher.finalize());

    Ok(SummaryArtifact { path, summary_len: summary.len(), summary_sha256 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_artifact_and_computes_hash() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = write_summary_artifact(dir.path(), 1, "a summary").unwrap();
        assert!(artifact.path.exists());
        assert_eq!(artifact.summary_len, "a summary".len());
        assert_eq!(fs::read_to_string(&artifact.path).unwrap(), "a summary");
    }

    #[test]
    fn same_content_hashes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_summary_artifact(dir.path(), 1, "same").unwrap();
        let b = write_summary_artifact(dir.path(), 2, "same").unwrap();
        assert_eq!(a.summary_sha256, b.summary_sha256);
    }

    #[test]
    fn creates_missing_artifacts_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("artifacts");
        write_summary_artifact(&nested, 1, "x").unwrap();
        assert!(nested.exists());
    }
}
