//! Shared worker pool for target invocations
//!
//! The pool runs target executions and fill calls as tokio tasks. It either
//! owns a dedicated multi-threaded runtime, whose worker threads are started
//! when the pool is built so the first queries after startup do not pay for
//! thread creation, or it schedules onto an existing runtime handle.
//!
//! A semaphore bounds how many submitted tasks execute at once; tasks beyond
//! the bound queue inside the pool until a permit frees up. Pool statistics
//! are kept in atomics.

use crate::config::WorkerPoolConfig;
use crate::error::FederationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Tasks submitted since the pool was created
    pub submitted: u64,
    /// Tasks that ran to completion
    pub completed: u64,
    /// Tasks currently holding a permit
    pub active: usize,
    /// Highest number of tasks that held a permit at the same time
    pub peak_active: usize,
    /// Permits currently available
    pub available_permits: usize,
}

impl PoolStats {
    /// Tasks submitted but not yet finished, running or queued
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.completed)
    }
}

/// Bounded pool executing federation work
pub struct WorkerPool {
    handle: Handle,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Build a pool with its own multi-threaded runtime
    pub fn new(config: &WorkerPoolConfig) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(FederationError::Io)?;

        debug!(
            worker_threads = config.worker_threads,
            max_in_flight = config.max_in_flight,
            "Started federation worker pool"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            max_in_flight: config.max_in_flight,
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Build a pool scheduling onto the runtime the caller is running in
    ///
    /// Only `max_in_flight` of `config` is used; thread settings belong to
    /// the surrounding runtime.
    pub fn from_current(config: &WorkerPoolConfig) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|e| {
            FederationError::config_error(
                "worker_pool",
                format!("no tokio runtime is running: {}", e),
                "Call from within a runtime or use WorkerPool::new to start a dedicated one",
            )
        })?;
        Ok(Self::from_handle(handle, config.max_in_flight))
    }

    /// Build a pool scheduling onto the given runtime handle
    pub fn from_handle(handle: Handle, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            handle,
            runtime: None,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Whether the pool owns its runtime
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Maximum number of concurrently executing tasks
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Submit a task
    ///
    /// The task waits for a permit before `future` is first polled. Aborting
    /// the returned handle cancels the task at its next await point.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.permits.available_permits() == 0 {
            trace!(max_in_flight = self.max_in_flight, "Worker pool saturated, task queued");
        }

        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);
        self.handle.spawn(async move {
            // The semaphore is never closed; a missing permit just means unbounded
            let _permit = permits.acquire_owned().await.ok();
            let _active = ActiveGuard::enter(&counters);
            future.await
        })
    }

    /// Current statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            peak_active: self.counters.peak_active.load(Ordering::Relaxed),
            available_permits: self.permits.available_permits(),
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("owns_runtime", &self.owns_runtime())
            .field("max_in_flight", &self.max_in_flight)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Detached target executions may still be running; do not wait for them
            runtime.shutdown_background();
        }
    }
}

/// Tracks one task holding a permit; counts completion on drop
struct ActiveGuard<'a> {
    counters: &'a PoolCounters,
}

impl<'a> ActiveGuard<'a> {
    fn enter(counters: &'a PoolCounters) -> Self {
        let active = counters.active.fetch_add(1, Ordering::Relaxed) + 1;
        counters.peak_active.fetch_max(active, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
    }
}
