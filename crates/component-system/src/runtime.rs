//! The injectable runtime object: the shared worker pool and generator
//! registry every pipeline and tree draws on. See `SPEC_FULL.md` §9
//! ("global default executor + generator registry become an injectable
//! `Runtime` object").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use component_config::helpers::{deserialize_duration_from_milliseconds, serialize_duration_to_milliseconds};
use component_config::registry::{Injectable, Registry};
use component_config::Configurable;
use component_error::RuntimeError;
use serde::{Deserialize, Serialize};

use crate::generator::GeneratorRegistry;

/// Tunables for a [`Runtime`], loaded the way every `Configurable` type in
/// this crate family is: `serde::Deserialize` with a `#[serde(default)]`
/// per field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Documents the intended parallelism of the shared worker pool. Each
    /// pipeline borrows a task from the ambient Tokio runtime rather than a
    /// dedicated OS thread, so this is advisory unless a caller builds a
    /// dedicated multi-threaded Tokio runtime sized from it.
    #[serde(default = "RuntimeConfig::default_worker_threads")]
    pub worker_threads: usize,
    /// Default event-queue bound new pipelines are created with, absent an
    /// override at `Pipeline` construction time.
    #[serde(default = "RuntimeConfig::default_queue_bound")]
    pub default_queue_bound: usize,
    /// Default budget `Stop` handlers are given before being abandoned;
    /// individual components may override via `Component::on_stop_timeout`.
    #[serde(
        default = "RuntimeConfig::default_on_stop_timeout_ms",
        deserialize_with = "deserialize_duration_from_milliseconds",
        serialize_with = "serialize_duration_to_milliseconds"
    )]
    pub on_stop_timeout: Duration,
    /// §9 open question: whether `Stop`'s low-priority handlers are waited
    /// on before `Components::stop` returns. Default `true`; see
    /// `SPEC_FULL.md` for the recorded decision.
    #[serde(default = "RuntimeConfig::default_stop_blocks_until_drained")]
    pub stop_blocks_until_drained: bool,
}

const DEFAULT_CONFIG_PATH: &str = "./component_system_config.yaml";

impl RuntimeConfig {
    /// Loads from `./component_system_config.yaml` if present, overlaid with
    /// `COMPONENT_SYSTEM_`-prefixed environment variables, falling back to
    /// [`RuntimeConfig::default`] field values for anything neither sets.
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: &str) -> Self {
        use figment::providers::{Env, Format, Yaml};

        let mut f = figment::Figment::from(Env::prefixed("COMPONENT_SYSTEM_"));
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        f.join(figment::providers::Serialized::defaults(RuntimeConfig::default()))
            .extract()
            .unwrap_or_else(|e| panic!("error loading config from {path}: {e}"))
    }

    fn default_worker_threads() -> usize {
        num_cpus::get().max(1)
    }

    fn default_queue_bound() -> usize {
        4096
    }

    fn default_on_stop_timeout_ms() -> Duration {
        Duration::from_secs(6)
    }

    fn default_stop_blocks_until_drained() -> bool {
        true
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: RuntimeConfig::default_worker_threads(),
            default_queue_bound: RuntimeConfig::default_queue_bound(),
            on_stop_timeout: RuntimeConfig::default_on_stop_timeout_ms(),
            stop_blocks_until_drained: RuntimeConfig::default_stop_blocks_until_drained(),
        }
    }
}

impl Injectable for RuntimeConfig {}

struct Inner {
    generators: GeneratorRegistry,
    config: RuntimeConfig,
}

/// The shared context every component tree, pipeline and event is built
/// against: a generator registry for quiescence tracking plus the tunables
/// in [`RuntimeConfig`]. Cheap to clone; every clone is the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime {
            inner: Arc::new(Inner {
                generators: GeneratorRegistry::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn generators(&self) -> &GeneratorRegistry {
        &self.inner.generators
    }

    /// Runs `exhaustion` to completion whenever every pipeline drawing on
    /// this runtime is idle and every registered generator has
    /// deregistered. Mirrors `Components.awaitExhaustion()` (§4.7/§6).
    pub async fn await_exhaustion(&self) {
        self.inner.generators.await_exhaustion().await;
    }

    pub async fn await_exhaustion_timeout(&self, timeout: Duration) -> bool {
        self.inner.generators.await_exhaustion_timeout(timeout).await
    }

    /// Hands `fut` to the shared worker pool. Every pipeline's drain loop
    /// is spawned through this single call site so that an injected
    /// `Runtime` could in principle route work onto a dedicated executor.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(fut);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}

#[async_trait]
impl Configurable<RuntimeConfig> for Runtime {
    async fn try_from_config(
        config: &RuntimeConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn RuntimeError>> {
        Ok(Runtime::new(config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = RuntimeConfig::default();
        assert!(config.worker_threads >= 1);
        assert!(config.stop_blocks_until_drained);
    }

    #[tokio::test]
    async fn runtime_default_starts_quiescent() {
        let runtime = Runtime::default();
        runtime.await_exhaustion_timeout(Duration::from_millis(10)).await;
        assert!(runtime.generators().is_quiescent());
    }

    #[test]
    fn load_from_path_overlays_yaml_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "component_system_config.yaml",
                r#"
                worker_threads: 8
                stop_blocks_until_drained: false
                "#,
            )?;
            let config = RuntimeConfig::load_from_path("component_system_config.yaml");
            assert_eq!(config.worker_threads, 8);
            assert!(!config.stop_blocks_until_drained);
            assert_eq!(config.default_queue_bound, RuntimeConfig::default_queue_bound());
            Ok(())
        });
    }

    #[test]
    fn load_from_path_falls_back_to_defaults_when_absent() {
        figment::Jail::expect_with(|_jail| {
            let config = RuntimeConfig::load_from_path("does_not_exist.yaml");
            assert_eq!(config.worker_threads, RuntimeConfig::default_worker_threads());
            Ok(())
        });
    }
}
