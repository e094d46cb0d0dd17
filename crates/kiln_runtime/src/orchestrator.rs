//! Execution orchestrator.
//!
//! Accepts submissions, gates them through the concurrency governor, keeps
//! the registry of records, dispatches each execution to the backend that
//! matches its language, and finalizes the record when the backend returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::{
    BackendOutcome, BackendRequest, ChunkSink, Execution, ExecutionId, ExecutionOptions,
    FailureKind, IsolationKind, SandboxBackend, SubmitError, SubmitResult, Timestamp,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::events::{EventBus, EventSubscription, ExecutionEvent};
use crate::governor::{ConcurrencyGovernor, Permit};
use crate::monitor::EngineStats;
use crate::registry::{Finalize, Registry};

const MIB: u64 = 1024 * 1024;

/// Builder wiring backends into an orchestrator
pub struct OrchestratorBuilder {
    config: EngineConfig,
    backends: HashMap<IsolationKind, Arc<dyn SandboxBackend>>,
}

impl OrchestratorBuilder {
    /// Register a backend for the isolation kind it reports
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn SandboxBackend>) -> Self {
        self.backends.insert(backend.isolation(), backend);
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> Orchestrator {
        Orchestrator {
            inner: Arc::new(Inner {
                governor: ConcurrencyGovernor::new(self.config.max_concurrent),
                events: EventBus::new(self.config.event_capacity),
                registry: Registry::new(),
                stats: RwLock::new(EngineStats::new()),
                backends: self.backends,
                config: self.config,
            }),
        }
    }
}

struct Inner {
    config: EngineConfig,
    governor: ConcurrencyGovernor,
    registry: Registry,
    events: EventBus,
    stats: RwLock<EngineStats>,
    backends: HashMap<IsolationKind, Arc<dyn SandboxBackend>>,
}

/// A submission that passed validation
struct Admitted {
    backend: Arc<dyn SandboxBackend>,
    timeout: Duration,
    memory_limit_bytes: u64,
}

/// Entry point of the engine; cheap to clone
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            backends: HashMap::new(),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Get the concurrency governor
    #[must_use]
    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.inner.governor
    }

    /// Submit an execution.
    ///
    /// Returns as soon as the execution is dispatched; use
    /// [`wait`](Self::wait) or [`get_result`](Self::get_result) for the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOptions` or `UnsupportedLanguage` for requests that
    /// cannot run, `CapacityExceeded` when every slot is taken. No record is
    /// created in either case.
    pub async fn submit(&self, options: ExecutionOptions) -> SubmitResult<ExecutionId> {
        let admitted = match self.admit(&options) {
            Ok(admitted) => admitted,
            Err(err) => {
                self.inner.stats.write().await.record_rejection();
                return Err(err);
            }
        };
        let Some(permit) = self.inner.governor.try_acquire() else {
            self.inner.stats.write().await.record_rejection();
            let limit = self.inner.governor.capacity();
            warn!(limit, language = %options.language, "Capacity exceeded");
            return Err(SubmitError::CapacityExceeded { limit });
        };

        let (id, cancel) = self
            .inner
            .registry
            .insert_running(options.language, &options.code, Timestamp::now())
            .await;
        self.inner.stats.write().await.record_submit();
        info!(
            execution_id = %id,
            language = %options.language,
            backend = admitted.backend.name(),
            "Execution submitted"
        );
        self.inner.events.publish(ExecutionEvent::Started {
            id: id.clone(),
            language: options.language,
        });

        let chunks = {
            let events = self.inner.events.clone();
            let id = id.clone();
            ChunkSink::new(move |chunk| {
                events.publish(ExecutionEvent::OutputChunk {
                    id: id.clone(),
                    chunk,
                });
            })
        };
        let request = BackendRequest {
            execution_id: id.clone(),
            profile: options.language.profile(),
            timeout: admitted.timeout,
            memory_limit_bytes: admitted.memory_limit_bytes,
            max_output_bytes: self.inner.config.max_output_bytes,
            options: Arc::new(options),
            cancel,
            chunks,
        };

        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        let backend = admitted.backend;
        let task = tokio::spawn(async move {
            let outcome = run_backend(backend, request, permit).await;
            inner.finalize(&task_id, outcome).await;
        });
        self.inner.registry.attach_task(&id, task).await;
        Ok(id)
    }

    /// Validate options, pick the backend and resolve the effective limits
    fn admit(&self, options: &ExecutionOptions) -> SubmitResult<Admitted> {
        let config = &self.inner.config;
        if options.code.trim().is_empty() {
            return Err(SubmitError::invalid("code", "must not be empty"));
        }
        let timeout = options.timeout.unwrap_or_else(|| config.default_timeout());
        if timeout.is_zero() {
            return Err(SubmitError::invalid("timeout", "must be positive"));
        }
        if timeout > config.max_timeout() {
            return Err(SubmitError::invalid(
                "timeout",
                format!("must not exceed {} ms", config.max_timeout_ms),
            ));
        }
        let memory_mb = options.memory_limit_mb.unwrap_or(config.default_memory_limit_mb);
        if memory_mb == 0 {
            return Err(SubmitError::invalid("memoryLimitMb", "must be positive"));
        }
        if memory_mb > config.max_memory_limit_mb {
            return Err(SubmitError::invalid(
                "memoryLimitMb",
                format!("must not exceed {} MiB", config.max_memory_limit_mb),
            ));
        }
        let memory_limit_bytes = memory_mb
            .checked_mul(MIB)
            .ok_or_else(|| SubmitError::invalid("memoryLimitMb", "too large"))?;

        let isolation = options.language.profile().isolation();
        let backend = self
            .inner
            .backends
            .get(&isolation)
            .cloned()
            .ok_or_else(|| SubmitError::UnsupportedLanguage {
                language: options.language.tag().to_string(),
            })?;
        Ok(Admitted {
            backend,
            timeout,
            memory_limit_bytes,
        })
    }

    /// Snapshot of a record
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or evicted ids
    pub async fn get_result(&self, id: &ExecutionId) -> SubmitResult<Execution> {
        self.inner
            .registry
            .get(id)
            .await
            .ok_or_else(|| SubmitError::NotFound { id: id.to_string() })
    }

    /// Wait until a record is terminal
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or evicted ids
    pub async fn wait(&self, id: &ExecutionId) -> SubmitResult<Execution> {
        let mut rx = self
            .inner
            .registry
            .watch(id)
            .await
            .ok_or_else(|| SubmitError::NotFound { id: id.to_string() })?;
        let terminal = rx
            .wait_for(Execution::is_terminal)
            .await
            .map(|record| record.clone());
        // Evicted while waiting; the last value seen is still the record.
        Ok(terminal.unwrap_or_else(|_| rx.borrow().clone()))
    }

    /// Cancel a running execution.
    ///
    /// Returns `false` if the record was already terminal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids
    pub async fn cancel(&self, id: &ExecutionId) -> SubmitResult<bool> {
        let cancelled = self.inner.registry.cancel(id, Timestamp::now()).await?;
        if cancelled {
            info!(execution_id = %id, "Execution cancelled");
            if let Some(record) = self.inner.registry.get(id).await {
                self.inner.stats.write().await.record_terminal(&record);
            }
            self.inner
                .events
                .publish(ExecutionEvent::Cancelled { id: id.clone() });
        }
        Ok(cancelled)
    }

    /// Every record, newest first
    pub async fn list_executions(&self) -> Vec<Execution> {
        self.inner.registry.list().await
    }

    /// Remove terminal records older than `max_age`
    pub async fn evict_expired(&self, max_age: Duration) -> usize {
        let evicted = self.inner.registry.evict(max_age, Timestamp::now()).await;
        if evicted > 0 {
            debug!(evicted, "Evicted expired executions");
            self.inner.stats.write().await.record_eviction(evicted);
        }
        evicted
    }

    /// Subscribe to lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// Telemetry snapshot
    pub async fn stats(&self) -> EngineStats {
        let mut stats = self.inner.stats.read().await.clone();
        stats.running = self.inner.governor.in_flight() as u64;
        stats
    }

    /// Evict expired records every `interval` until the task is aborted
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                orchestrator.evict_expired(max_age).await;
            }
        })
    }

    /// Cancel every running execution and stop their tasks.
    ///
    /// Returns how many executions were cancelled.
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.inner.registry.abort_all(Timestamp::now()).await;
        for id in &cancelled {
            if let Some(record) = self.inner.registry.get(id).await {
                self.inner.stats.write().await.record_terminal(&record);
            }
            self.inner
                .events
                .publish(ExecutionEvent::Cancelled { id: id.clone() });
        }
        if !cancelled.is_empty() {
            info!(cancelled = cancelled.len(), "Orchestrator shut down");
        }
        cancelled.len()
    }
}

/// Run the backend on its own task so a panic becomes an outcome.
///
/// The permit lives on that task, so the slot stays taken until the backend
/// has let go of its resources, even when the driving task is aborted.
async fn run_backend(
    backend: Arc<dyn SandboxBackend>,
    request: BackendRequest,
    permit: Permit,
) -> BackendOutcome {
    let id = request.execution_id.clone();
    let run = tokio::spawn(async move {
        let outcome = backend.execute(request).await;
        drop(permit);
        outcome
    });
    match run.await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            warn!(execution_id = %id, error = %err, "Backend could not run execution");
            BackendOutcome::from_error(&err)
        }
        Err(join) => {
            warn!(execution_id = %id, error = %join, "Backend task failed");
            BackendOutcome::failed(
                FailureKind::RuntimeError,
                format!("backend task failed: {join}"),
                String::new(),
            )
        }
    }
}

impl Inner {
    /// Record the outcome, then tell watchers and subscribers.
    ///
    /// The slot is already free by the time this runs.
    async fn finalize(&self, id: &ExecutionId, outcome: BackendOutcome) {
        let result = self.registry.finalize(id, outcome, Timestamp::now()).await;

        match result {
            Finalize::Finalized(record) => {
                info!(
                    execution_id = %id,
                    status = %record.status,
                    runtime_ms = record.runtime_ms,
                    output_bytes = record.output.len(),
                    "Execution finished"
                );
                self.stats.write().await.record_terminal(&record);
                self.registry.notify(id).await;
                self.events.publish(ExecutionEvent::Completed {
                    execution: Box::new(record),
                });
            }
            Finalize::AlreadyTerminal(record) => {
                debug!(execution_id = %id, status = %record.status, "Late outcome ignored");
            }
            Finalize::Missing => {
                debug!(execution_id = %id, "Outcome for evicted execution ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiln_core::{BackendError, ExecutionStatus, Language};
    use kiln_sandbox::{InProcessBackend, SandboxConfig};

    /// Backend following a fixed script
    #[derive(Debug, Clone)]
    enum Script {
        Print(&'static [&'static str]),
        Exit(i64),
        Hang,
        Linger(Duration),
        Fail(BackendError),
        Panic,
    }

    struct FakeBackend {
        isolation: IsolationKind,
        script: Script,
    }

    #[async_trait]
    impl SandboxBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn isolation(&self) -> IsolationKind {
            self.isolation
        }

        async fn execute(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError> {
            match &self.script {
                Script::Print(chunks) => {
                    for chunk in *chunks {
                        request.chunks.emit(chunk.as_bytes());
                    }
                    Ok(BackendOutcome::completed(chunks.concat(), 0, 1024))
                }
                Script::Exit(code) => Ok(BackendOutcome::completed(String::new(), *code, 0)),
                Script::Hang => {
                    tokio::select! {
                        () = request.cancel.cancelled() => Ok(BackendOutcome::failed(
                            FailureKind::Cancelled,
                            "execution cancelled",
                            String::new(),
                        )),
                        () = tokio::time::sleep(request.timeout) => Ok(BackendOutcome::failed(
                            FailureKind::Timeout,
                            "timed out",
                            String::new(),
                        )),
                    }
                }
                Script::Linger(hold) => {
                    tokio::time::sleep(*hold).await;
                    Ok(BackendOutcome::completed(String::new(), 0, 0))
                }
                Script::Fail(err) => Err(err.clone()),
                Script::Panic => panic!("backend exploded"),
            }
        }
    }

    fn fake(config: EngineConfig, script: Script) -> Orchestrator {
        Orchestrator::builder(config)
            .with_backend(Arc::new(FakeBackend {
                isolation: IsolationKind::Container,
                script,
            }))
            .build()
    }

    fn wasm(config: EngineConfig) -> Orchestrator {
        Orchestrator::builder(config)
            .with_backend(Arc::new(InProcessBackend::new(SandboxConfig::new())))
            .build()
    }

    fn python(code: &str) -> ExecutionOptions {
        ExecutionOptions::new(Language::Python, code)
    }

    const HELLO: &str = r#"
        (module
          (import "env" "print" (func $print (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "Hello\n")
          (func (export "main")
            (call $print (i32.const 0) (i32.const 6))))
    "#;

    const SPIN: &str = r#"(module (func (export "main") (loop $spin (br $spin))))"#;

    const FLOOD: &str = r#"
        (module
          (import "env" "print" (func $print (param i32 i32)))
          (memory (export "memory") 1)
          (func (export "main") (local $i i32)
            (loop $more
              (call $print (i32.const 0) (i32.const 65536))
              (local.set $i (i32.add (local.get $i) (i32.const 1)))
              (br_if $more (i32.lt_u (local.get $i) (i32.const 32))))))
    "#;

    #[tokio::test]
    async fn test_hello_completes() {
        let engine = wasm(EngineConfig::default());
        let id = engine
            .submit(ExecutionOptions::new(Language::Wat, HELLO))
            .await
            .unwrap();
        assert!(id.as_str().starts_with("wat_"));

        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.output.contains("Hello"));
        assert_eq!(result.exit_code, Some(0));
        assert!(result.metrics.ended_at.is_some());
        assert_eq!(engine.get_result(&id).await.unwrap(), result);
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let engine = wasm(EngineConfig::default());
        let options = ExecutionOptions::new(Language::Wat, SPIN).with_timeout(Duration::from_millis(50));
        let id = engine.submit(options).await.unwrap();

        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.error_kind, Some(FailureKind::Timeout));
        assert!(result.runtime_ms >= 50);
        assert!(result.runtime_ms < 2_000);
        assert_eq!(engine.governor().available(), engine.governor().capacity());
    }

    #[tokio::test]
    async fn test_output_flood_is_capped() {
        let engine = wasm(EngineConfig::default());
        let id = engine
            .submit(ExecutionOptions::new(Language::Wat, FLOOD))
            .await
            .unwrap();

        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error_kind, Some(FailureKind::OutputLimitExceeded));
        assert!(result.output.len() <= 1024 * 1024);
        assert!(result.output.len() > 1024 * 1024 - 65_536);
        assert_eq!(engine.stats().await.output_limited, 1);
    }

    #[tokio::test]
    async fn test_transform_language_is_reported_not_run() {
        let engine = wasm(EngineConfig::default());
        let id = engine
            .submit(ExecutionOptions::new(
                Language::AssemblyScript,
                "export function main(): void {}",
            ))
            .await
            .unwrap();

        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error_kind, Some(FailureKind::UnsupportedLanguage));
    }

    #[tokio::test]
    async fn test_capacity_rejection_creates_no_record() {
        let engine = fake(EngineConfig::default().with_max_concurrent(1), Script::Hang);
        let first = engine.submit(python("while True: pass")).await.unwrap();

        let err = engine.submit(python("print(2)")).await.unwrap_err();
        assert_eq!(err, SubmitError::CapacityExceeded { limit: 1 });
        assert!(err.is_retryable());
        assert_eq!(engine.list_executions().await.len(), 1);

        engine.cancel(&first).await.unwrap();
        let stats = engine.stats().await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let cases = [
            python("   "),
            python("print(1)").with_timeout(Duration::ZERO),
            python("print(1)").with_timeout(Duration::from_secs(61)),
            python("print(1)").with_memory_limit_mb(0),
        ];
        for options in cases {
            let err = engine.submit(options).await.unwrap_err();
            assert!(matches!(err, SubmitError::InvalidOptions { .. }), "{err}");
        }
        assert!(engine.list_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_limit_is_bounded() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        for mb in [4097, u64::MAX / 1024, u64::MAX] {
            let err = engine
                .submit(python("print(1)").with_memory_limit_mb(mb))
                .await
                .unwrap_err();
            assert!(matches!(err, SubmitError::InvalidOptions { .. }), "{err}");
        }
        assert!(engine.list_executions().await.is_empty());

        let id = engine
            .submit(python("print(1)").with_memory_limit_mb(4096))
            .await
            .unwrap();
        assert_eq!(engine.wait(&id).await.unwrap().status, ExecutionStatus::Completed);

        // A raised ceiling still cannot overflow the byte count.
        let unbounded = fake(
            EngineConfig::default().with_max_memory_limit_mb(u64::MAX),
            Script::Exit(0),
        );
        let err = unbounded
            .submit(python("print(1)").with_memory_limit_mb(u64::MAX / 1024))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidOptions { .. }));
        assert!(unbounded.list_executions().await.is_empty());
        assert_eq!(unbounded.governor().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unknown_language_rejected_at_the_edge() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let json = r#"{"code":"IDENTIFICATION DIVISION.","language":"cobol"}"#;
        assert!(serde_json::from_str::<ExecutionOptions>(json).is_err());
        assert!("cobol".parse::<Language>().is_err());
        assert!(engine.list_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_backend_is_unsupported() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let err = engine
            .submit(ExecutionOptions::new(Language::Wat, HELLO))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedLanguage { .. }));
        assert!(engine.list_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_stable() {
        let engine = fake(EngineConfig::default(), Script::Hang);
        let id = engine.submit(python("input()")).await.unwrap();

        assert!(engine.cancel(&id).await.unwrap());
        assert!(!engine.cancel(&id).await.unwrap());

        let cancelled = engine.wait(&id).await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

        // The backend's own outcome arrives later and must not overwrite.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.get_result(&id).await.unwrap(), cancelled);
        assert_eq!(engine.governor().available(), engine.governor().capacity());
        assert_eq!(engine.stats().await.cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let id = engine.submit(python("pass")).await.unwrap();
        engine.wait(&id).await.unwrap();
        assert!(!engine.cancel(&id).await.unwrap());
        assert_eq!(engine.get_result(&id).await.unwrap().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_id_not_found() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let id = ExecutionId::from("python_0000000000000000");
        assert!(matches!(engine.get_result(&id).await, Err(SubmitError::NotFound { .. })));
        assert!(matches!(engine.cancel(&id).await, Err(SubmitError::NotFound { .. })));
        assert!(matches!(engine.wait(&id).await, Err(SubmitError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_repeated_timeouts_release_slots() {
        let engine = fake(EngineConfig::default().with_max_concurrent(2), Script::Hang);
        for _ in 0..5 {
            let options = python("while True: pass").with_timeout(Duration::from_millis(20));
            let id = engine.submit(options).await.unwrap();
            let result = engine.wait(&id).await.unwrap();
            assert_eq!(result.status, ExecutionStatus::Timeout);
            assert!(result.runtime_ms >= 20);
            assert_eq!(engine.governor().available(), 2);
        }
        assert_eq!(engine.stats().await.timed_out, 5);
    }

    #[tokio::test]
    async fn test_repeated_wasm_timeouts_release_slots() {
        let engine = wasm(EngineConfig::default().with_max_concurrent(2));
        for _ in 0..5 {
            let options = ExecutionOptions::new(Language::Wat, SPIN)
                .with_timeout(Duration::from_millis(20));
            let id = engine.submit(options).await.unwrap();
            let result = engine.wait(&id).await.unwrap();
            assert_eq!(result.status, ExecutionStatus::Timeout);
            assert!(result.runtime_ms >= 20);
            assert_eq!(engine.governor().available(), 2);
            assert_eq!(engine.stats().await.running, 0);
        }
        assert_eq!(engine.stats().await.timed_out, 5);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_slot_until_backend_returns() {
        let engine = fake(
            EngineConfig::default().with_max_concurrent(1),
            Script::Linger(Duration::from_millis(150)),
        );
        let id = engine.submit(python("import time")).await.unwrap();

        assert_eq!(engine.shutdown().await, 1);
        assert_eq!(engine.get_result(&id).await.unwrap().status, ExecutionStatus::Cancelled);
        assert_eq!(engine.governor().in_flight(), 1);
        assert!(matches!(
            engine.submit(python("print(1)")).await,
            Err(SubmitError::CapacityExceeded { .. })
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.governor().in_flight(), 0);
        assert_eq!(engine.get_result(&id).await.unwrap().status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_backend_errors() {
        let engine = fake(EngineConfig::default(), Script::Exit(2));
        let id = engine.submit(python("exit(2)")).await.unwrap();
        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.error_kind, Some(FailureKind::RuntimeError));

        let unavailable = BackendError::EnvironmentUnavailable {
            reason: "daemon unreachable".to_string(),
        };
        let engine = fake(EngineConfig::default(), Script::Fail(unavailable));
        let id = engine.submit(python("print(1)")).await.unwrap();
        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error_kind, Some(FailureKind::EnvironmentUnavailable));
    }

    #[tokio::test]
    async fn test_backend_panic_is_finalized_and_releases_slot() {
        let engine = fake(EngineConfig::default().with_max_concurrent(1), Script::Panic);
        let id = engine.submit(python("print(1)")).await.unwrap();
        let result = engine.wait(&id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error_kind, Some(FailureKind::RuntimeError));
        assert!(engine.governor().try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let engine = fake(EngineConfig::default(), Script::Print(&["Hel", "lo\n"]));
        let mut events = engine.subscribe();
        let id = engine.submit(python("print('Hello')")).await.unwrap();

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            assert_eq!(event.execution_id(), &id);
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }

        assert!(matches!(seen[0], ExecutionEvent::Started { language: Language::Python, .. }));
        let chunks: Vec<&[u8]> = seen
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::OutputChunk { chunk, .. } => Some(chunk.as_ref()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec![b"Hel".as_slice(), b"lo\n".as_slice()]);
        let ExecutionEvent::Completed { execution } = seen.last().unwrap() else {
            panic!("last event must be Completed");
        };
        assert_eq!(execution.output, "Hello\n");
    }

    #[tokio::test]
    async fn test_cancel_publishes_event() {
        let engine = fake(EngineConfig::default(), Script::Hang);
        let id = engine.submit(python("input()")).await.unwrap();
        let mut events = engine.subscribe();
        engine.cancel(&id).await.unwrap();
        assert_eq!(events.recv().await, Some(ExecutionEvent::Cancelled { id }));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(engine.submit(python(&format!("print({i})"))).await.unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let listed: Vec<ExecutionId> = engine.list_executions().await.into_iter().map(|e| e.id).collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let done = engine.submit(python("pass")).await.unwrap();
        engine.wait(&done).await.unwrap();

        let hanging = Orchestrator::builder(EngineConfig::default())
            .with_backend(Arc::new(FakeBackend {
                isolation: IsolationKind::Container,
                script: Script::Hang,
            }))
            .build();
        let running = hanging.submit(python("input()")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.evict_expired(Duration::from_secs(60)).await, 0);
        assert_eq!(engine.evict_expired(Duration::from_millis(10)).await, 1);
        assert!(matches!(engine.get_result(&done).await, Err(SubmitError::NotFound { .. })));
        assert_eq!(engine.stats().await.evicted, 1);

        assert_eq!(hanging.evict_expired(Duration::ZERO).await, 0);
        assert!(hanging.get_result(&running).await.is_ok());

        assert_eq!(hanging.shutdown().await, 1);
        let record = hanging.wait(&running).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Cancelled);
        assert_eq!(hanging.shutdown().await, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hanging.governor().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_evicts() {
        let engine = fake(EngineConfig::default(), Script::Exit(0));
        let id = engine.submit(python("pass")).await.unwrap();
        engine.wait(&id).await.unwrap();

        let sweeper = engine.spawn_sweeper(Duration::from_millis(10), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();
        assert!(engine.list_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_submissions_respect_bound() {
        let engine = fake(EngineConfig::default().with_max_concurrent(3), Script::Hang);
        let mut accepted = Vec::new();
        let mut rejected = 0;
        for i in 0..10 {
            match engine.submit(python(&format!("# {i}"))).await {
                Ok(id) => accepted.push(id),
                Err(SubmitError::CapacityExceeded { .. }) => rejected += 1,
                Err(other) => panic!("unexpected {other}"),
            }
        }
        assert_eq!(accepted.len(), 3);
        assert_eq!(rejected, 7);
        assert_eq!(engine.stats().await.running, 3);
        for id in &accepted {
            engine.cancel(id).await.unwrap();
        }
    }
}
