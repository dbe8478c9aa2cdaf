//! Handle to the async runtime the server instances execute on.

use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

/// The execution engine: a tokio runtime handle, optionally owning the
/// runtime behind it.
///
/// Clones share the same runtime. An owned runtime is shut down in the
/// background when the last clone is dropped, so dropping an engine is safe
/// from any context.
#[derive(Clone)]
pub struct Engine {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl Engine {
    /// Build an engine with its own multi-threaded runtime.
    pub fn new(worker_threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("burro-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Build an engine with one worker per available CPU.
    pub fn with_defaults() -> io::Result<Self> {
        Self::new(available_parallelism())
    }

    /// Borrow the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// Borrow an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle, owned: None }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether this engine owns its runtime.
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// Number of CPUs the process may use, at least one.
pub(crate) fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_engine_runs_tasks() {
        let engine = Engine::new(2).unwrap();
        assert!(engine.is_owned());

        let value = engine.handle().block_on(async { 40 + 2 });
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_current_engine_borrows() {
        let engine = Engine::current();
        assert!(!engine.is_owned());

        let task = engine.handle().spawn(async { "spawned" });
        assert_eq!(task.await.unwrap(), "spawned");
    }

    #[tokio::test]
    async fn test_dropping_owned_engine_inside_runtime() {
        let engine = Engine::new(1).unwrap();
        drop(engine);
    }
}
