//! Configuration file.

use std::path::Path;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use kiln_container::ContainerConfig;
use kiln_runtime::EngineConfig;
use kiln_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};

/// Everything the binary can be configured with; every section is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Orchestrator limits
    pub engine: EngineConfig,
    /// In-process backend
    pub sandbox: SandboxConfig,
    /// Container backend
    pub container: ContainerConfig,
}

impl KilnConfig {
    /// Load from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .wrap_err_with(|| format!("invalid config {}", path.display()))
    }
}
