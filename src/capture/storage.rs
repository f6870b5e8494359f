use crate::error::CaptureError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const PROC_MOUNTS: &str = "/proc/mounts";
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_PROBE: &str = ".write_test";

/// Files removed and files that could not be removed by a purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
}

/// Create the staging directory, back it by tmpfs when requested, and
/// confirm it is writable. Mount problems only degrade to disk storage.
pub async fn prepare(folder: &Path, use_tmpfs: bool) -> Result<(), CaptureError> {
    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|source| CaptureError::StorageNotWritable {
            path: folder.display().to_string(),
            source,
        })?;

    if use_tmpfs {
        let mounts = tokio::fs::read_to_string(PROC_MOUNTS)
            .await
            .unwrap_or_default();
        if is_tmpfs_mount(&mounts, folder) {
            debug!("tmpfs already mounted at {}", folder.display());
        } else {
            match mount_tmpfs(folder).await {
                Ok(()) => info!("Mounted tmpfs at {}", folder.display()),
                Err(details) => warn!(
                    "Could not mount tmpfs at {} ({}), using persistent storage",
                    folder.display(),
                    details
                ),
            }
        }
    }

    check_writable(folder).await
}

/// Whether the mount table lists `folder` as a tmpfs mount point
pub fn is_tmpfs_mount(mounts: &str, folder: &Path) -> bool {
    let target = folder.to_string_lossy();
    let target = target.trim_end_matches('/');
    mounts.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let _source = fields.next();
        let mount_point = fields.next();
        let fs_type = fields.next();
        mount_point == Some(target) && fs_type == Some("tmpfs")
    })
}

async fn mount_tmpfs(folder: &Path) -> Result<(), String> {
    let mount = Command::new("mount")
        .args(["-t", "tmpfs", "tmpfs"])
        .arg(folder)
        .output();

    match tokio::time::timeout(MOUNT_TIMEOUT, mount).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("mount timed out".to_string()),
    }
}

/// Create and delete a probe file
pub async fn check_writable(folder: &Path) -> Result<(), CaptureError> {
    let probe = folder.join(WRITE_PROBE);
    let not_writable = |source: std::io::Error| CaptureError::StorageNotWritable {
        path: folder.display().to_string(),
        source,
    };

    tokio::fs::write(&probe, b"").await.map_err(not_writable)?;
    tokio::fs::remove_file(&probe).await.map_err(not_writable)?;
    Ok(())
}

/// Whether a filename looks like a staged frame
pub fn is_frame_file(name: &str, prefix: &str, extension: &str) -> bool {
    name.starts_with(prefix)
        && Path::new(name)
            .extension()
            .map(|ext| ext == extension)
            .unwrap_or(false)
}

/// Staged frames in filename order
pub fn list_frames(folder: &Path, prefix: &str, extension: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return Vec::new();
    };

    let mut frames: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_frame_file(&entry.file_name().to_string_lossy(), prefix, extension))
        .map(|entry| entry.path())
        .collect();
    frames.sort();
    frames
}

/// Delete every file with the frame extension; failures are logged and skipped
pub fn purge(folder: &Path, extension: &str) -> PurgeReport {
    let mut report = PurgeReport::default();
    let Ok(entries) = std::fs::read_dir(folder) else {
        return report;
    };

    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.extension().map(|ext| ext != extension).unwrap_or(true) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Could not remove {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }

    if report.removed > 0 {
        info!("Removed {} stale frames from {}", report.removed, folder.display());
    }
    report
}
