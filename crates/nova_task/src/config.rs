//! Environment-variable configuration, read once on first use.

use nova_os::sync::OnceLock;
use nova_os::time::Duration;

/// Process-wide runtime configuration, parsed once from environment
/// variables (distilled spec §6). Parsing failures fall back to the
/// documented default for that variable rather than panicking, consistent
/// with the "no exceptions from core APIs" policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeConfig {
    /// `OLO_NO_THREADING=1` forces single-threaded execution.
    pub no_threading: bool,
    /// `OLO_FORCE_MULTITHREAD=1` forces multithreading on single-core systems.
    pub force_multithread: bool,
    /// `OLO_TASK_GRAPH_DYNAMIC_PRIORITIZATION` — temporarily lower the OS
    /// priority of a worker running a background task on a foreground worker.
    pub dynamic_prioritization: bool,
    /// `OLO_TASK_GRAPH_DYNAMIC_THREAD_CREATION` — create workers on demand
    /// instead of pre-creating all of them at `start_workers`.
    pub dynamic_thread_creation: bool,
    /// `OLO_TASK_GRAPH_OVERSUBSCRIPTION_RATIO` — ceiling multiplier (>= 1.0)
    /// for the total number of allowed workers.
    pub oversubscription_ratio: f32,
    /// `OLO_PARALLEL_FOR_YIELD_MS` — background yield timeout (peripheral;
    /// kept for completeness though `ParallelFor` itself is out of scope).
    pub parallel_for_yield: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            no_threading: false,
            force_multithread: false,
            dynamic_prioritization: true,
            dynamic_thread_creation: true,
            oversubscription_ratio: 1.5,
            parallel_for_yield: Duration::from_millis(2),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "1",
        Err(_) => default,
    }
}

fn env_f32(name: &str, default: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| *v >= 1.0)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl RuntimeConfig {
    fn from_env() -> Self {
        let default = RuntimeConfig::default();
        RuntimeConfig {
            no_threading: env_bool("OLO_NO_THREADING", default.no_threading),
            force_multithread: env_bool("OLO_FORCE_MULTITHREAD", default.force_multithread),
            dynamic_prioritization: env_bool(
                "OLO_TASK_GRAPH_DYNAMIC_PRIORITIZATION",
                default.dynamic_prioritization,
            ),
            dynamic_thread_creation: env_bool(
                "OLO_TASK_GRAPH_DYNAMIC_THREAD_CREATION",
                default.dynamic_thread_creation,
            ),
            oversubscription_ratio: env_f32(
                "OLO_TASK_GRAPH_OVERSUBSCRIPTION_RATIO",
                default.oversubscription_ratio,
            ),
            parallel_for_yield: env_millis(
                "OLO_PARALLEL_FOR_YIELD_MS",
                default.parallel_for_yield,
            ),
        }
    }
}

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Returns the process-wide configuration, parsing environment variables
/// on the first call and caching the result for the lifetime of the process.
pub fn runtime_config() -> RuntimeConfig {
    *CONFIG.get_or_init(RuntimeConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert!(!config.no_threading);
        assert!(config.oversubscription_ratio >= 1.0);
    }

    #[test]
    fn env_f32_rejects_sub_unity_ratio() {
        assert_eq!(env_f32("NOVA_TASK_TEST_DOES_NOT_EXIST", 1.5), 1.5);
    }
}
