pub mod helpers;
pub mod registry;

use async_trait::async_trait;
use component_error::RuntimeError;
use registry::Registry;
use thiserror::Error;

/// A trait for constructing a struct from a config object plus a registry of
/// already-constructed dependencies.
///
/// Components that need to be configured from the application's config file
/// should implement this trait rather than taking ad-hoc constructor
/// arguments, so that the whole dependency graph can be wired up from a
/// single root config value.
#[async_trait]
pub trait Configurable<T, E = Box<dyn RuntimeError>> {
    async fn try_from_config(config: &T, registry: &Registry) -> Result<Self, E>
    where
        Self: Sized;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config error: {0}")]
    ConfigError(#[from] figment::Error),
}

impl RuntimeError for ConfigError {
    fn code(&self) -> component_error::ErrorCodes {
        component_error::ErrorCodes::Internal
    }
}
