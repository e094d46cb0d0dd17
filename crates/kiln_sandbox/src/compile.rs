//! Source admission and module compilation.
//!
//! Each invocation gets its own [`Engine`] so the epoch watchdog of one
//! execution can never interrupt another.

use kiln_core::{IsolationBackend, LanguageProfile};
use wasmtime::{Config, Engine, Module};

use crate::fuel::FuelBudget;

/// Compilation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The language needs a source transform this backend does not have
    #[error("{language} requires a source transform that is not available")]
    TransformUnavailable {
        /// Language tag
        language: String,
    },

    /// The profile does not target the in-process backend
    #[error("{language} does not run in-process")]
    NotInProcess {
        /// Language tag
        language: String,
    },

    /// Source larger than the configured limit
    #[error("source of {size} bytes exceeds limit of {limit} bytes")]
    SourceTooLarge {
        /// Source size
        size: usize,
        /// Limit
        limit: usize,
    },

    /// Source does not parse or validate
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Engine could not be configured
    #[error("engine setup failed: {0}")]
    Engine(String),
}

/// Check that a source can be handed to the interpreter as-is
///
/// # Errors
///
/// Returns error if the profile needs a transform, targets another backend,
/// or the source is over `max_source_bytes`
pub fn admit_source(
    profile: &LanguageProfile,
    code: &str,
    max_source_bytes: usize,
) -> Result<(), CompileError> {
    match profile.backend {
        IsolationBackend::InProcess { transform: None } => {}
        IsolationBackend::InProcess { transform: Some(_) } => {
            return Err(CompileError::TransformUnavailable {
                language: profile.language.tag().to_string(),
            });
        }
        IsolationBackend::Container { .. } => {
            return Err(CompileError::NotInProcess {
                language: profile.language.tag().to_string(),
            });
        }
    }
    if code.len() > max_source_bytes {
        return Err(CompileError::SourceTooLarge {
            size: code.len(),
            limit: max_source_bytes,
        });
    }
    Ok(())
}

/// Build an engine with epoch interruption on and fuel as budgeted
///
/// # Errors
///
/// Returns error if wasmtime rejects the configuration
pub fn build_engine(fuel: &FuelBudget) -> Result<Engine, CompileError> {
    let mut config = Config::new();
    config.epoch_interruption(true);
    config.consume_fuel(fuel.is_metered());
    Engine::new(&config).map_err(|e| CompileError::Engine(e.to_string()))
}

/// Compile text-format source into a module
///
/// # Errors
///
/// Returns error if the source does not parse or validate
pub fn compile(engine: &Engine, code: &str) -> Result<Module, CompileError> {
    Module::new(engine, code).map_err(|e| CompileError::InvalidModule(format!("{e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::Language;

    #[test]
    fn test_admit_wat() {
        assert!(admit_source(Language::Wat.profile(), "(module)", 1024).is_ok());
    }

    #[test]
    fn test_reject_transform() {
        let err = admit_source(Language::AssemblyScript.profile(), "export function main(): void {}", 1024)
            .unwrap_err();
        assert!(matches!(err, CompileError::TransformUnavailable { .. }));
    }

    #[test]
    fn test_reject_container_profile() {
        let err = admit_source(Language::Python.profile(), "print(1)", 1024).unwrap_err();
        assert!(matches!(err, CompileError::NotInProcess { .. }));
    }

    #[test]
    fn test_reject_oversized_source() {
        let err = admit_source(Language::Wat.profile(), "(module)", 4).unwrap_err();
        assert_eq!(err, CompileError::SourceTooLarge { size: 8, limit: 4 });
    }

    #[test]
    fn test_compile_valid_and_invalid() {
        let engine = build_engine(&FuelBudget::unmetered()).unwrap();
        assert!(compile(&engine, "(module (func (export \"main\")))").is_ok());
        let err = compile(&engine, "(module (func $broken").unwrap_err();
        assert!(matches!(err, CompileError::InvalidModule(_)));
    }
}
