//! Namespace fingerprinting.
//!
//! The cache is only consulted for processes whose namespace set matches the
//! container's init process (§4.4); this module defines the tuple used for
//! that comparison and the collaborator trait the FUSE front-end's
//! process-identity resolver must implement.

/// The inode numbers of a process's `pid`, `net`, `ipc`, `uts`, `cgroup` and
/// `user` namespaces, in that order. `mnt` is deliberately excluded: the
/// overlay itself lives in the mount namespace, so every process the overlay
/// sees differs there by construction (see spec §4.3, "why not just enter
/// the mount namespace too").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NsFingerprint {
    pub pid: u64,
    pub net: u64,
    pub ipc: u64,
    pub uts: u64,
    pub cgroup: u64,
    pub user: u64,
}

impl NsFingerprint {
    pub fn new(pid: u64, net: u64, ipc: u64, uts: u64, cgroup: u64, user: u64) -> Self {
        NsFingerprint {
            pid,
            net,
            ipc,
            uts,
            cgroup,
            user,
        }
    }
}

/// Process-identity and namespace-inode resolution is explicitly out of
/// scope for the core (spec §1); this is the collaborator interface the core
/// consumes instead of resolving `/proc/<pid>/ns/*` inodes itself.
pub trait NsResolver: Send + Sync {
    /// Returns the namespace fingerprint of `pid`, or `None` if the process
    /// is gone or its namespace files could not be read.
    fn fingerprint_of(&self, pid: libc::pid_t) -> Option<NsFingerprint>;
}

/// Collaborator consumed from the container-state service (§6):
/// `ProcessNsMatch(a, b) -> bool`.
///
/// Implemented here as a plain equality on [NsFingerprint] since the
/// fingerprint already captures everything namespace sameness means for
/// caching purposes; kept as a function rather than inlining `==` at call
/// sites so the comparison reads the same way spec §4.4 describes it.
pub fn process_ns_match(a: &NsFingerprint, b: &NsFingerprint) -> bool {
    a == b
}

/// A test double for [NsResolver] that returns a fixed fingerprint per pid,
/// used by this crate's own tests and end-to-end scenarios in place of a
/// real `/proc/<pid>/ns/*` reader.
#[derive(Default)]
pub struct StaticNsResolver {
    fingerprints: std::sync::RwLock<std::collections::HashMap<libc::pid_t, NsFingerprint>>,
}

impl StaticNsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pid: libc::pid_t, fingerprint: NsFingerprint) {
        self.fingerprints.write().unwrap().insert(pid, fingerprint);
    }
}

impl NsResolver for StaticNsResolver {
    fn fingerprint_of(&self, pid: libc::pid_t) -> Option<NsFingerprint> {
        self.fingerprints.read().unwrap().get(&pid).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_fingerprints_match() {
        let a = NsFingerprint::new(1, 2, 3, 4, 5, 6);
        let b = NsFingerprint::new(1, 2, 3, 4, 5, 6);
        assert!(process_ns_match(&a, &b));
    }

    #[test]
    fn static_resolver_returns_none_for_unset_pid() {
        let resolver = StaticNsResolver::new();
        resolver.set(10, NsFingerprint::new(1, 1, 1, 1, 1, 1));
        assert!(resolver.fingerprint_of(10).is_some());
        assert!(resolver.fingerprint_of(99).is_none());
    }

    #[test]
    fn differing_fingerprints_do_not_match() {
        let a = NsFingerprint::new(1, 2, 3, 4, 5, 6);
        let b = NsFingerprint::new(1, 2, 3, 4, 5, 7);
        assert!(!process_ns_match(&a, &b));
    }
}
