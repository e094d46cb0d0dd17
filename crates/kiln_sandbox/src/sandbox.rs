//! In-process backend.
//!
//! Runs WebAssembly text modules under wasmtime. Every invocation gets a
//! fresh engine, store and linker. The wall-clock budget and cancellation
//! are enforced through epoch interruption: a watchdog task bumps the
//! engine epoch when the timeout elapses or the cancel token fires, and the
//! guest traps at its next loop back-edge or call.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use kiln_core::{
    BackendError, BackendOutcome, BackendRequest, FailureKind, IsolationKind, OutputGovernor,
    SandboxBackend,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wasmtime::{Engine, Linker, Module, Store, Trap};

use crate::compile::{admit_source, build_engine, compile, CompileError};
use crate::fuel::FuelBudget;
use crate::host::{link_output, GuestState, HostTrap};
use crate::memory::{GuestLimits, MemoryExhausted, DEFAULT_MAX_TABLE_ELEMENTS};

/// Fallback entry export for command-style modules
pub const START_EXPORT: &str = "_start";

/// In-process backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Instruction budget, `None` for wall-clock only
    pub max_fuel: Option<u64>,
    /// Largest accepted source, in bytes
    pub max_source_bytes: usize,
    /// Table ceiling, in elements
    pub max_table_elements: usize,
}

impl SandboxConfig {
    /// Create a new sandbox config
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_fuel: None,
            max_source_bytes: 1024 * 1024,
            max_table_elements: DEFAULT_MAX_TABLE_ELEMENTS,
        }
    }

    /// Set the instruction budget
    #[must_use]
    pub fn with_max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = Some(fuel);
        self
    }

    /// Set the source size limit
    #[must_use]
    pub fn with_max_source_bytes(mut self, bytes: usize) -> Self {
        self.max_source_bytes = bytes;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the watchdog fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

/// What the blocking guest thread hands back
struct GuestRun {
    result: wasmtime::Result<i64>,
    output: OutputGovernor,
    peak_memory_bytes: u64,
    fuel_consumed: Option<u64>,
}

/// Backend running guests inside the host process
#[derive(Debug, Clone, Default)]
pub struct InProcessBackend {
    config: SandboxConfig,
}

impl InProcessBackend {
    /// Create a new in-process backend
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[async_trait]
impl SandboxBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "wasmtime"
    }

    fn isolation(&self) -> IsolationKind {
        IsolationKind::InProcess
    }

    async fn execute(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError> {
        if let Err(err) = admit_source(request.profile, request.code(), self.config.max_source_bytes) {
            return match err {
                CompileError::TransformUnavailable { language } => {
                    Err(BackendError::UnsupportedLanguage { language })
                }
                CompileError::NotInProcess { .. } => Err(BackendError::internal(err)),
                other => Ok(BackendOutcome::failed(
                    FailureKind::RuntimeError,
                    other.to_string(),
                    String::new(),
                )),
            };
        }
        if request.cancel.is_cancelled() {
            return Ok(cancelled(String::new()));
        }

        let fuel = FuelBudget::new(self.config.max_fuel);
        let engine = build_engine(&fuel).map_err(BackendError::internal)?;
        let module = match compile(&engine, request.code()) {
            Ok(module) => module,
            Err(err) => {
                debug!(execution_id = %request.execution_id, error = %err, "Module rejected");
                return Ok(BackendOutcome::failed(
                    FailureKind::RuntimeError,
                    err.to_string(),
                    String::new(),
                ));
            }
        };

        let state = GuestState::new(
            request.max_output_bytes,
            request.chunks.clone(),
            GuestLimits::new(request.memory_limit_bytes, self.config.max_table_elements),
        );
        let interrupt = Arc::new(OnceLock::new());
        let watchdog = spawn_watchdog(
            engine.clone(),
            request.timeout,
            request.cancel.clone(),
            Arc::clone(&interrupt),
        );

        let entry = request.profile.run;
        let guest_interrupt = Arc::clone(&interrupt);
        let joined = tokio::task::spawn_blocking(move || {
            run_guest(&engine, &module, entry, state, fuel, &guest_interrupt)
        })
        .await;
        watchdog.abort();

        let run = joined.map_err(|e| BackendError::internal(format!("guest thread failed: {e}")))?;
        debug!(
            execution_id = %request.execution_id,
            peak_memory = run.peak_memory_bytes,
            output_bytes = run.output.len(),
            fuel_consumed = ?run.fuel_consumed,
            "Guest finished"
        );
        Ok(classify(run, interrupt.get().copied(), request.timeout))
    }
}

/// Bump the engine epoch once the timeout elapses or the caller cancels.
///
/// The reason is recorded before the bump, so a guest that sees the
/// interrupt always finds it set.
fn spawn_watchdog(
    engine: Engine,
    timeout: Duration,
    cancel: CancellationToken,
    interrupt: Arc<OnceLock<Interrupt>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = tokio::select! {
            () = tokio::time::sleep(timeout) => Interrupt::Timeout,
            () = cancel.cancelled() => Interrupt::Cancelled,
        };
        let _ = interrupt.set(reason);
        engine.increment_epoch();
    })
}

fn run_guest(
    engine: &Engine,
    module: &Module,
    entry: &str,
    state: GuestState,
    fuel: FuelBudget,
    interrupt: &OnceLock<Interrupt>,
) -> GuestRun {
    let mut store = Store::new(engine, state);
    store.limiter(|state| &mut state.limits);
    store.set_epoch_deadline(1);

    // The watchdog may have fired before the deadline was armed.
    let result = if interrupt.get().is_some() {
        Err(Trap::Interrupt.into())
    } else {
        fuel.install(&mut store)
            .and_then(|()| invoke(&mut store, module, entry))
    };

    let fuel_consumed = fuel.consumed(&store);
    let state = store.into_data();
    GuestRun {
        result,
        peak_memory_bytes: state.peak_memory_bytes(),
        output: state.into_output(),
        fuel_consumed,
    }
}

/// Instantiate and call the entry export.
///
/// An `i32` result becomes the exit code; a unit entry exits with zero.
fn invoke(store: &mut Store<GuestState>, module: &Module, entry: &str) -> wasmtime::Result<i64> {
    let mut linker = Linker::new(store.engine());
    link_output(&mut linker)?;
    let instance = linker.instantiate(&mut *store, module)?;

    let name = [entry, START_EXPORT]
        .into_iter()
        .find(|name| instance.get_func(&mut *store, name).is_some())
        .ok_or_else(|| anyhow::anyhow!("module exports neither `{entry}` nor `{START_EXPORT}`"))?;

    if let Ok(func) = instance.get_typed_func::<(), i32>(&mut *store, name) {
        return Ok(i64::from(func.call(&mut *store, ())?));
    }
    let func = instance.get_typed_func::<(), ()>(&mut *store, name)?;
    func.call(&mut *store, ())?;
    Ok(0)
}

fn cancelled(output: String) -> BackendOutcome {
    BackendOutcome::failed(FailureKind::Cancelled, "execution cancelled", output)
}

/// Map the guest result onto a terminal outcome
fn classify(run: GuestRun, interrupt: Option<Interrupt>, timeout: Duration) -> BackendOutcome {
    let peak = run.peak_memory_bytes;
    let output = run.output.into_text();
    let err = match run.result {
        Ok(exit_code) => return BackendOutcome::completed(output, exit_code, peak),
        Err(err) => err,
    };

    if let Some(trap) = err.downcast_ref::<HostTrap>() {
        let kind = match trap {
            HostTrap::OutputLimitExceeded { .. } => FailureKind::OutputLimitExceeded,
            HostTrap::OutOfBounds { .. } | HostTrap::NoMemory => FailureKind::RuntimeError,
        };
        return BackendOutcome::failed(kind, trap.to_string(), output).with_memory(peak);
    }
    if let Some(trap) = err.downcast_ref::<MemoryExhausted>() {
        return BackendOutcome::failed(FailureKind::MemoryExhausted, trap.to_string(), output)
            .with_memory(trap.limit);
    }
    match err.downcast_ref::<Trap>() {
        Some(Trap::Interrupt) => match interrupt {
            Some(Interrupt::Cancelled) => cancelled(output).with_memory(peak),
            Some(Interrupt::Timeout) | None => BackendOutcome::failed(
                FailureKind::Timeout,
                format!("execution timed out after {} ms", timeout.as_millis()),
                output,
            )
            .with_memory(peak),
        },
        Some(Trap::OutOfFuel) => {
            BackendOutcome::failed(FailureKind::RuntimeError, "fuel exhausted", output)
                .with_memory(peak)
        }
        _ => {
            warn!(error = ?err, "Guest trapped");
            BackendOutcome::failed(FailureKind::RuntimeError, err.root_cause().to_string(), output)
                .with_memory(peak)
        }
    }
}
