//! Executor Configuration
//!
//! Worker pool sizing. The default comes from the `FLOWRUNNER_POOL_SIZE`
//! environment variable when it holds a positive integer, and from the
//! number of available CPUs otherwise.

use log::warn;
use once_cell::sync::Lazy;

/// Environment variable overriding the default pool size.
pub const POOL_SIZE_ENV: &str = "FLOWRUNNER_POOL_SIZE";

/// Default number of workers, resolved once per process.
pub static DEFAULT_POOL_SIZE: Lazy<usize> =
    Lazy::new(|| pool_size_from(std::env::var(POOL_SIZE_ENV).ok().as_deref()));

fn pool_size_from(value: Option<&str>) -> usize {
    match value.map(str::trim) {
        Some(raw) => match raw.parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => {
                warn!("Ignoring invalid {}={:?}", POOL_SIZE_ENV, raw);
                num_cpus::get().max(1)
            }
        },
        None => num_cpus::get().max(1),
    }
}

/// Settings for an [`Executor`](crate::executor::Executor).
///
/// # Example
///
/// ```rust
/// use flowrunner::ExecutorConfig;
///
/// let config = ExecutorConfig::default().with_pool_size(4);
/// assert_eq!(config.pool_size, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of worker threads
    pub pool_size: usize,
}

impl ExecutorConfig {
    /// Sets the number of workers; zero is raised to one.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: *DEFAULT_POOL_SIZE,
        }
    }
}
