use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PROC_MODULES: &str = "/proc/modules";
const DEV_DIR: &str = "/dev";

/// How much of the capture chain could be confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceConfidence {
    /// Executable, device node and driver all present
    Verified,
    /// Executable and device present, driver could not be confirmed
    Degraded,
    /// Executable or device node missing
    Unavailable,
}

/// Result of probing the capture chain
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCheck {
    pub executable: Option<PathBuf>,
    pub device_nodes: Vec<PathBuf>,
    /// `None` when the module list could not be read
    pub driver_loaded: Option<bool>,
}

impl DeviceCheck {
    pub fn confidence(&self) -> DeviceConfidence {
        if self.executable.is_none() || self.device_nodes.is_empty() {
            DeviceConfidence::Unavailable
        } else if self.driver_loaded == Some(true) {
            DeviceConfidence::Verified
        } else {
            DeviceConfidence::Degraded
        }
    }
}

/// Probe the executable, device nodes and kernel driver
pub fn probe(executable: &str, device_prefix: &str, driver_module: &str) -> DeviceCheck {
    let check = DeviceCheck {
        executable: resolve_executable(executable),
        device_nodes: find_device_nodes(Path::new(DEV_DIR), device_prefix),
        driver_loaded: driver_loaded(Path::new(PROC_MODULES), driver_module),
    };

    if check.executable.is_none() {
        warn!("Capture executable '{}' not found in PATH", executable);
    }
    if check.device_nodes.is_empty() {
        warn!("No {}/{}* device nodes found", DEV_DIR, device_prefix);
    }
    match check.driver_loaded {
        Some(true) => debug!("Kernel module '{}' loaded", driver_module),
        Some(false) => warn!("Kernel module '{}' not loaded", driver_module),
        None => debug!("Could not read {}", PROC_MODULES),
    }

    check
}

/// Resolve an executable name through PATH; names with a slash are taken as paths
pub fn resolve_executable(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Device nodes in `dir` whose name starts with `prefix`, sorted
pub fn find_device_nodes(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut nodes: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    nodes.sort();
    nodes
}

/// Whether a module whose name contains `module` appears in the module list
pub fn driver_loaded(modules_path: &Path, module: &str) -> Option<bool> {
    let listing = std::fs::read_to_string(modules_path).ok()?;
    Some(
        listing
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|name| name.contains(module)),
    )
}
