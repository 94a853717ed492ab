//! Runtime configuration consumed by the core.
//!
//! Per spec §6, the only knob the core itself consumes is `ignore_errors`;
//! this is expanded per SPEC_FULL.md §1.1 with the agent pool size and the
//! set of paths for which caching is always bypassed (S6 — the core cannot
//! tell `kernel/random/uuid` is special from its bytes alone, so it is named
//! explicitly).

/// Configuration handed to [crate::overlay::Overlay::from_config] by the
/// embedder; `ignore_errors` and `write_through_retries` flow straight into
/// the write-policy combinators built for the resource catalog (see
/// [crate::resources::build_registry]).
///
/// Unlike the teacher crate's `distribution::Registry`, which reads no
/// external configuration at all, the overlay core is always constructed
/// with an explicit `Config` — there is no implicit environment-variable
/// fallback.
#[derive(Debug, Clone)]
pub struct Config {
    /// When set, best-effort kernel writes (see
    /// [crate::policy::WritePolicy::WriteMaxInt]) swallow the kernel's error
    /// instead of failing the request. Used when the host refuses a write
    /// that would otherwise fail the container's sysctl.
    pub ignore_errors: bool,

    /// Permit count for the nsenter agent's dispatch semaphore (see
    /// `agent::protocol::NsenterClient::new`). Consumed when the embedder
    /// constructs its `NsenterClient`, before handing the resulting
    /// `AgentClient` to [crate::overlay::Overlay::from_config] — not read by
    /// `Overlay` itself.
    pub agent_pool_size: usize,

    /// Absolute paths for which the per-container cache is always bypassed,
    /// regardless of namespace fingerprint (e.g. `/proc/sys/kernel/random/uuid`,
    /// which must return a fresh value on every read per S6).
    pub no_cache_paths: Vec<String>,

    /// Bounded retry count for the max-/min-wins write-through loop (§4.5).
    pub write_through_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ignore_errors: false,
            agent_pool_size: 4,
            no_cache_paths: vec!["/proc/sys/kernel/random/uuid".to_string()],
            write_through_retries: 5,
        }
    }
}

impl Config {
    /// Returns true if caching must be bypassed unconditionally for `path`.
    pub fn is_no_cache_path(&self, path: &str) -> bool {
        self.no_cache_paths.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_marks_random_uuid_as_no_cache() {
        let config = Config::default();
        assert!(config.is_no_cache_path("/proc/sys/kernel/random/uuid"));
        assert!(!config.is_no_cache_path("/proc/sys/vm/overcommit_memory"));
    }
}
