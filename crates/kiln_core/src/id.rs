//! Execution identifiers.
//!
//! IDs are derived from a BLAKE3 digest of the source and the submission
//! time, truncated and prefixed with the language tag. No central counter
//! is involved.

use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::time::Timestamp;

/// Number of hex characters kept from the digest
pub const DIGEST_HEX_LEN: usize = 16;

/// Execution identifier, e.g. `python_9f1c2e...`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Derive an id from the source payload and submission time
    #[must_use]
    pub fn derive(language: Language, code: &str, submitted_at: Timestamp) -> Self {
        Self::derive_salted(language, code, submitted_at, 0)
    }

    /// Derive with an extra salt, used to step past a collision
    #[must_use]
    pub fn derive_salted(language: Language, code: &str, submitted_at: Timestamp, salt: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(code.as_bytes());
        hasher.update(&submitted_at.as_nanos().to_le_bytes());
        hasher.update(&salt.to_le_bytes());
        let digest = hex::encode(hasher.finalize().as_bytes());
        Self(format!("{}_{}", language.tag(), &digest[..DIGEST_HEX_LEN]))
    }

    /// Wrap an existing id string (e.g. from a request path)
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Language prefix, if the id carries a known one
    #[must_use]
    pub fn language(&self) -> Option<Language> {
        let (prefix, _) = self.0.rsplit_once('_')?;
        prefix.parse().ok()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExecutionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
