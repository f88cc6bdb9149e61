//! The generator registry: the quiescence mechanism behind
//! `Runtime::await_exhaustion` (§4.7).
//!
//! A "generator" is anything that represents ongoing work that keeps the
//! system from being idle: a pipeline that has events to drain, or a
//! long-running external source (an I/O loop, a timer). Pipelines register
//! themselves automatically (see `pipeline.rs`); application code registers
//! its own generators explicitly via [`GeneratorRegistry::register`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// A process-wide (or, in tests, per-`Runtime`) set of outstanding
/// generators. Cloning is cheap; every clone shares the same counter.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: AtomicI64,
    notify: Notify,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        GeneratorRegistry::default()
    }

    /// Registers one unit of ongoing work. The returned handle deregisters
    /// it on drop; holding the handle is what keeps `await_exhaustion` from
    /// returning.
    pub fn register(&self) -> GeneratorHandle {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        GeneratorHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn active_count(&self) -> i64 {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_quiescent(&self) -> bool {
        self.active_count() == 0
    }

    /// Blocks until no generator remains registered. Fair with respect to
    /// churn: a generator deregistering and a new one registering in the
    /// same instant will not cause a spurious early return, because the
    /// count is re-checked after every notification.
    pub async fn await_exhaustion(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_quiescent() {
                return;
            }
            notified.await;
        }
    }

    /// Like [`GeneratorRegistry::await_exhaustion`], bounded by `timeout`.
    /// Returns whether exhaustion was actually reached.
    pub async fn await_exhaustion_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.await_exhaustion())
            .await
            .is_ok()
    }
}

/// RAII membership in a [`GeneratorRegistry`]. Dropping it deregisters.
pub struct GeneratorHandle {
    inner: Arc<Inner>,
}

impl Drop for GeneratorHandle {
    fn drop(&mut self) {
        let remaining = self.inner.count.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(remaining >= 0, "generator registry count went negative");
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhaustion_returns_immediately_when_empty() {
        let registry = GeneratorRegistry::new();
        registry.await_exhaustion().await;
    }

    #[tokio::test]
    async fn exhaustion_waits_for_deregistration() {
        let registry = GeneratorRegistry::new();
        let handle = registry.register();
        assert_eq!(registry.active_count(), 1);
        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.await_exhaustion().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(handle);
        waiter.await.unwrap();
        assert!(registry.is_quiescent());
    }

    #[tokio::test]
    async fn timeout_reports_false_when_not_exhausted() {
        let registry = GeneratorRegistry::new();
        let _handle = registry.register();
        let reached = registry.await_exhaustion_timeout(Duration::from_millis(20)).await;
        assert!(!reached);
    }
}
