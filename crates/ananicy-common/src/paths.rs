//! Standard filesystem paths for ananicy.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default configuration directory holding rules, types and cgroups.
pub static ANANICY_CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("ANANICY_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/ananicy.d"))
});

/// Name of the daemon configuration file inside the config directory.
pub const CONFIG_FILE: &str = "ananicy.conf";

/// Host locations the daemon reads and writes.
#[derive(Debug, Clone)]
pub struct AnanicyPaths {
    /// Rule directory (default: /etc/ananicy.d).
    pub config_dir: PathBuf,
    /// procfs mount (default: /proc).
    pub proc_root: PathBuf,
    /// cgroup filesystem mount (default: /sys/fs/cgroup).
    pub cgroup_root: PathBuf,
    /// Block device class directory (default: /sys/class/block).
    pub block_root: PathBuf,
}

impl AnanicyPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different rule directory.
    #[must_use]
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Use a different procfs mount.
    #[must_use]
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// Use a different cgroup filesystem mount.
    #[must_use]
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = root.into();
        self
    }

    /// Use a different block device class directory.
    #[must_use]
    pub fn with_block_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.block_root = root.into();
        self
    }

    /// The daemon configuration file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }
}

impl Default for AnanicyPaths {
    fn default() -> Self {
        Self {
            config_dir: ANANICY_CONFIG_DIR.clone(),
            proc_root: PathBuf::from("/proc"),
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            block_root: PathBuf::from("/sys/class/block"),
        }
    }
}
