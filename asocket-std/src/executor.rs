//! The runtime a transport spawns its loop on.

use std::sync::{Mutex, OnceLock};

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// Holds an optional runtime override for a transport.
///
/// Without an override, loops run on the runtime of the caller of `start`, or, when called outside of any runtime, on a
/// process-wide background runtime that is built on first use and never shut down.
#[derive(Debug, Default)]
pub(crate) struct Executor {
    handle: Mutex<Option<Handle>>,
}

impl Executor {
    pub(crate) fn set(&self, handle: Handle) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(current_or_background)
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().spawn(future)
    }
}

/// Returns the ambient runtime, falling back to the shared background runtime.
pub(crate) fn current_or_background() -> Handle {
    Handle::try_current().unwrap_or_else(|_| background().handle().clone())
}

fn background() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tracing::debug!("no ambient runtime, starting background runtime");
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("asocket-worker")
            .enable_all()
            .build()
            .expect("the background runtime should be buildable")
    })
}

#[cfg(test)]
mod tests {
    use super::{Executor, current_or_background};

    #[test]
    fn falls_back_to_background_runtime() {
        let executor = Executor::default();
        let value = std::thread::spawn(move || {
            let handle = executor.spawn(async { 42 });
            current_or_background().block_on(handle).unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn prefers_override() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("override-worker")
            .build()
            .unwrap();
        let executor = Executor::default();
        executor.set(runtime.handle().clone());

        let name = executor
            .spawn(async { std::thread::current().name().map(str::to_owned) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("override-worker"));

        tokio::task::spawn_blocking(move || drop(runtime))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn uses_ambient_runtime() {
        let executor = Executor::default();
        let test_thread = std::thread::current().id();

        let spawned_thread = executor
            .spawn(async { std::thread::current().id() })
            .await
            .unwrap();
        assert_eq!(spawned_thread, test_thread);
    }
}
