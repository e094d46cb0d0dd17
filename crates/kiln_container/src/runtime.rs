//! Unit runtime seam.
//!
//! A unit is one ephemeral container. [`UnitRuntime`] is the narrow set of
//! operations the backend needs; `DockerRuntime` implements it over the
//! Docker Engine API and tests substitute a scripted runtime.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::ContainerError;

/// Output channel a chunk was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One demultiplexed chunk of unit output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Source channel
    pub channel: Channel,
    /// Payload
    pub bytes: Bytes,
}

impl OutputChunk {
    /// Chunk written to stdout
    #[must_use]
    pub fn stdout(bytes: impl Into<Bytes>) -> Self {
        Self {
            channel: Channel::Stdout,
            bytes: bytes.into(),
        }
    }

    /// Chunk written to stderr
    #[must_use]
    pub fn stderr(bytes: impl Into<Bytes>) -> Self {
        Self {
            channel: Channel::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// Combined output of a unit, in write order
pub type OutputStream = BoxStream<'static, Result<OutputChunk, ContainerError>>;

/// Everything needed to create a unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    /// Unit name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Shell command run with `sh -c`
    pub command: String,
    /// Environment as `KEY=VALUE`
    pub env: Vec<String>,
    /// Host directory mounted read-only
    pub workspace: PathBuf,
    /// Mount point inside the unit
    pub mount_point: String,
    /// User the unit runs as
    pub user: String,
    /// Hard memory ceiling, swap included
    pub memory_bytes: u64,
    /// CPU ceiling in nano-CPUs
    pub nano_cpus: i64,
    /// Process ceiling
    pub pids_limit: i64,
    /// Size of the writable `/tmp`
    pub tmpfs_bytes: u64,
}

/// Operations on ephemeral units
#[async_trait]
pub trait UnitRuntime: Send + Sync + 'static {
    /// Runtime name for logs
    fn name(&self) -> &'static str;

    /// Make sure the image is present locally, pulling it if needed
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ImageUnavailable`] if it cannot be provided
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError>;

    /// Create a stopped unit and return its id
    ///
    /// # Errors
    ///
    /// Returns error if the runtime rejects the unit
    async fn create(&self, spec: &UnitSpec) -> Result<String, ContainerError>;

    /// Attach to the unit's combined output before it starts
    ///
    /// # Errors
    ///
    /// Returns error if the attach fails
    async fn attach(&self, unit: &str) -> Result<OutputStream, ContainerError>;

    /// Start a created unit
    ///
    /// # Errors
    ///
    /// Returns error if the unit cannot start
    async fn start(&self, unit: &str) -> Result<(), ContainerError>;

    /// Wait for the unit to stop and return its exit code
    ///
    /// # Errors
    ///
    /// Returns error if the wait is interrupted
    async fn wait(&self, unit: &str) -> Result<i64, ContainerError>;

    /// Kill a running unit; a unit that already stopped is not an error
    ///
    /// # Errors
    ///
    /// Returns error if the kill request fails
    async fn kill(&self, unit: &str) -> Result<(), ContainerError>;

    /// Force-remove a unit; a unit that is already gone is not an error
    ///
    /// # Errors
    ///
    /// Returns error if the removal fails
    async fn remove(&self, unit: &str) -> Result<(), ContainerError>;
}
