//! Container backend configuration.

use serde::{Deserialize, Serialize};

/// Limits and policy applied to every unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// CPU ceiling in CPUs
    pub cpu_limit: f64,
    /// Maximum processes inside the unit
    pub pids_limit: i64,
    /// Size of the writable `/tmp`
    pub tmpfs_size_mb: u64,
    /// Where the workspace is mounted
    pub workspace_mount: String,
    /// User the unit runs as
    pub user: String,
    /// Pull missing images instead of failing
    pub pull_images: bool,
}

impl ContainerConfig {
    /// Create a new container config
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu_limit: 1.0,
            pids_limit: 64,
            tmpfs_size_mb: 64,
            workspace_mount: "/workspace".to_string(),
            user: "65534:65534".to_string(),
            pull_images: true,
        }
    }

    /// Set the CPU ceiling
    #[must_use]
    pub fn with_cpu_limit(mut self, cpus: f64) -> Self {
        self.cpu_limit = cpus;
        self
    }

    /// Set the process ceiling
    #[must_use]
    pub fn with_pids_limit(mut self, pids: i64) -> Self {
        self.pids_limit = pids;
        self
    }

    /// Enable/disable image pulls
    #[must_use]
    pub fn with_pull_images(mut self, pull: bool) -> Self {
        self.pull_images = pull;
        self
    }

    /// CPU ceiling in the runtime's nano-CPU unit
    #[must_use]
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }

    /// Size of the writable `/tmp` in bytes
    #[must_use]
    pub fn tmpfs_bytes(&self) -> u64 {
        self.tmpfs_size_mb * 1024 * 1024
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.nano_cpus(), 1_000_000_000);
        assert_eq!(config.tmpfs_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.user, "65534:65534");
    }

    #[test]
    fn test_partial_json() {
        let config: ContainerConfig = serde_json::from_str(r#"{"cpu_limit":0.5}"#).unwrap();
        assert_eq!(config.cpu_limit, 0.5);
        assert!(config.pull_images);
    }
}
