//! Engine startup configuration: `max_workers`, resource-pool totals, and
//! monitoring toggles. A plain struct with a `Default` impl, loaded from
//! environment variables by `cli`, the same pattern `db::pool::create_pool`
//! uses for `DATABASE_URL`.

use crate::models::ResourceAmounts;

/// Process-wide engine configuration. One instance is built at startup and
/// used to construct the [`crate::scheduler::ResourcePool`] and bound the
/// scheduler's batch size; it is not mutated afterwards.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Scheduler batch size ceiling (default 10).
    pub max_workers: usize,
    /// Resource pool totals shared by every concurrent execution.
    pub resource_pool_totals: ResourceAmounts,
    /// Whether `engine::metrics::MetricsRegistry` records node/workflow
    /// observations. Disabling this only stops bookkeeping — it never
    /// changes scheduling or recovery behavior.
    pub monitoring_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            resource_pool_totals: ResourceAmounts {
                cpu_cores: 8.0,
                memory_mb: 16_384.0,
                network_mbps: 1_000.0,
                gpu_mb: 8_192.0,
                storage_io: 500.0,
            },
            monitoring_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to [`Default`] for any
    /// variable that is unset or fails to parse.
    ///
    /// - `ENGINE_MAX_WORKERS`
    /// - `ENGINE_POOL_CPU_CORES`, `ENGINE_POOL_MEMORY_MB`,
    ///   `ENGINE_POOL_NETWORK_MBPS`, `ENGINE_POOL_GPU_MB`,
    ///   `ENGINE_POOL_STORAGE_IO`
    /// - `ENGINE_MONITORING_ENABLED` (`"true"`/`"false"`)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let parsed = |name: &str, fallback: f64| -> f64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(fallback)
        };

        Self {
            max_workers: std::env::var("ENGINE_MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.max_workers),
            resource_pool_totals: ResourceAmounts {
                cpu_cores: parsed("ENGINE_POOL_CPU_CORES", defaults.resource_pool_totals.cpu_cores),
                memory_mb: parsed("ENGINE_POOL_MEMORY_MB", defaults.resource_pool_totals.memory_mb),
                network_mbps: parsed(
                    "ENGINE_POOL_NETWORK_MBPS",
                    defaults.resource_pool_totals.network_mbps,
                ),
                gpu_mb: parsed("ENGINE_POOL_GPU_MB", defaults.resource_pool_totals.gpu_mb),
                storage_io: parsed("ENGINE_POOL_STORAGE_IO", defaults.resource_pool_totals.storage_io),
            },
            monitoring_enabled: std::env::var("ENGINE_MONITORING_ENABLED")
                .ok()
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.monitoring_enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_workers, 10);
        assert_eq!(cfg.resource_pool_totals.cpu_cores, 8.0);
        assert!(cfg.monitoring_enabled);
    }

    #[test]
    fn from_env_falls_back_when_unset() {
        std::env::remove_var("ENGINE_MAX_WORKERS_TEST_UNUSED");
        let cfg = EngineConfig::from_env();
        assert!(cfg.max_workers > 0);
    }
}
