use crate::analyzer::BurnSummary;
use crate::error::Result;
use crate::events::CompletionReason;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// One completed run as written to the results directory
#[derive(Debug, Serialize)]
pub struct ArchivedRun<'a> {
    pub run_id: Uuid,
    pub reason: CompletionReason,
    pub completed_at: DateTime<Utc>,
    pub summary: &'a BurnSummary,
}

/// Overwrite the partial snapshot. Readers never see a half-written file.
pub fn write_snapshot(path: &Path, summary: &BurnSummary) -> Result<()> {
    let json = serde_json::to_vec(summary)?;
    write_atomic(path, &json)?;
    debug!(
        "Partial results written to {} ({} frames)",
        path.display(),
        summary.total_frames
    );
    Ok(())
}

/// Store a finished run as `<timestamp>_<run_id>.json` under `dir`
pub fn archive(
    dir: &Path,
    run_id: Uuid,
    reason: CompletionReason,
    summary: &BurnSummary,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let record = ArchivedRun {
        run_id,
        reason,
        completed_at: Utc::now(),
        summary,
    };
    let path = dir.join(format!(
        "{}_{}.json",
        record.completed_at.format("%Y%m%dT%H%M%SZ"),
        run_id
    ));

    let json = serde_json::to_vec_pretty(&record)?;
    write_atomic(&path, &json)?;
    Ok(path)
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");

        write_snapshot(&path, &BurnSummary::default()).unwrap();
        let summary = BurnSummary {
            total_frames: 9,
            ..BurnSummary::default()
        };
        write_snapshot(&path, &summary).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["total_frames"], 9);
        assert!(!dir.path().join("partial.json.tmp").exists());
    }

    #[test]
    fn test_archive_names_file_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let results_dir = dir.path().join("runs");
        let run_id = Uuid::new_v4();

        let path = archive(
            &results_dir,
            run_id,
            CompletionReason::AutoStop,
            &BurnSummary::default(),
        )
        .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(&format!("_{}.json", run_id)));

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["reason"], "auto_stop");
        assert_eq!(value["summary"]["total_frames"], 0);
    }
}
