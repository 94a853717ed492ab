//! Container registration and the collaborator directory service.
//!
//! Per spec §3 and §6, containers are created/destroyed by the runtime's
//! registration path, and the core only consumes the directory:
//! `LookupByPid`, `InitProc`, `ProcessNsMatch`. This module defines the
//! [Container] record and a [ContainerDirectory] trait so the core can be
//! exercised (and its own tests written) without the real runtime
//! integration, the same way the teacher crate defines `glue::Unpack`
//! as a trait a consumer implements rather than hard-coding one extraction
//! strategy.

use crate::cache::ContainerCache;
use crate::namespace::NsFingerprint;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A stable identifier for a registered container, supplied by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub String);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for ContainerId {
    fn from(s: S) -> Self {
        ContainerId(s.into())
    }
}

/// An inclusive UID or GID range, as handed to the container by the runtime
/// at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub host_start: u32,
    pub container_start: u32,
    pub size: u32,
}

impl IdRange {
    /// Maps a container-namespace id to the corresponding host id, if it
    /// falls within this range.
    pub fn map_to_host(&self, container_id: u32) -> Option<u32> {
        if container_id < self.container_start {
            return None;
        }
        let offset = container_id - self.container_start;
        if offset >= self.size {
            return None;
        }
        Some(self.host_start + offset)
    }
}

/// A registered container: the init-process pid, id ranges, creation time, a
/// namespace-inode fingerprint, and an owned key/value cache. Created when
/// the runtime registers the container; destroyed on unregister; mutated
/// only by the cache and the registration path (spec §3).
pub struct Container {
    pub id: ContainerId,
    pub init_pid: libc::pid_t,
    pub uid_range: IdRange,
    pub gid_range: IdRange,
    pub created_at: DateTime<Utc>,
    pub init_fingerprint: NsFingerprint,
    cache: ContainerCache,
}

impl Container {
    pub fn new(
        id: impl Into<ContainerId>,
        init_pid: libc::pid_t,
        uid_range: IdRange,
        gid_range: IdRange,
        init_fingerprint: NsFingerprint,
    ) -> Self {
        Container {
            id: id.into(),
            init_pid,
            uid_range,
            gid_range,
            created_at: Utc::now(),
            init_fingerprint,
            cache: ContainerCache::new(),
        }
    }

    /// This container's cache. See [crate::cache::ContainerCache] for the
    /// coherence rules of §4.4.
    pub fn cache(&self) -> &ContainerCache {
        &self.cache
    }

    /// Returns true if `candidate` belongs to this container's init
    /// namespace set, the gate the cache uses in §4.4.
    pub fn is_init_namespace(&self, candidate: &NsFingerprint) -> bool {
        crate::namespace::process_ns_match(&self.init_fingerprint, candidate)
    }
}

/// The collaborator interface the core consumes from the container-state
/// service (spec §6). No mutations besides registration/unregistration,
/// which happen outside request dispatch.
pub trait ContainerDirectory: Send + Sync {
    /// `LookupByPid(pid) -> Container?`
    fn lookup_by_pid(&self, pid: libc::pid_t) -> Option<Arc<Container>>;

    /// `InitProc(container) -> Process`, abbreviated here to the fingerprint
    /// of the container's init process, which is all the core needs.
    fn init_proc(&self, container: &ContainerId) -> Option<NsFingerprint>;

    /// Looks a container up by id rather than by the caller's pid; used by
    /// tests and by handlers that already hold an id.
    fn lookup_by_id(&self, id: &ContainerId) -> Option<Arc<Container>>;
}

/// A reference in-process implementation of [ContainerDirectory], backed by
/// a pid-indexed and id-indexed map. This is not how a production embedder
/// would implement the directory (that lives in the runtime-registration
/// component, out of scope per spec §1), but it is a faithful stand-in used
/// by this crate's own tests and end-to-end scenarios.
#[derive(Default)]
pub struct InMemoryContainerDirectory {
    by_id: RwLock<HashMap<ContainerId, Arc<Container>>>,
    by_pid: RwLock<HashMap<libc::pid_t, ContainerId>>,
}

impl InMemoryContainerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container and associates its init pid with it. Returns
    /// the previously-registered container at that id, if any, mirroring
    /// the runtime's "create on register" lifecycle from spec §3.
    pub fn register(&self, container: Container) -> Option<Arc<Container>> {
        let id = container.id.clone();
        let pid = container.init_pid;
        let container = Arc::new(container);

        self.by_pid.write().unwrap().insert(pid, id.clone());
        self.by_id.write().unwrap().insert(id, container)
    }

    /// Unregisters a container, tearing down its cache along with it.
    pub fn unregister(&self, id: &ContainerId) -> Option<Arc<Container>> {
        let removed = self.by_id.write().unwrap().remove(id);
        if let Some(ref container) = removed {
            self.by_pid.write().unwrap().remove(&container.init_pid);
        }
        removed
    }
}

impl ContainerDirectory for InMemoryContainerDirectory {
    fn lookup_by_pid(&self, pid: libc::pid_t) -> Option<Arc<Container>> {
        let id = self.by_pid.read().unwrap().get(&pid)?.clone();
        self.by_id.read().unwrap().get(&id).cloned()
    }

    fn init_proc(&self, container: &ContainerId) -> Option<NsFingerprint> {
        self.by_id
            .read()
            .unwrap()
            .get(container)
            .map(|c| c.init_fingerprint)
    }

    fn lookup_by_id(&self, id: &ContainerId) -> Option<Arc<Container>> {
        self.by_id.read().unwrap().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u64) -> NsFingerprint {
        NsFingerprint::new(n, n, n, n, n, n)
    }

    fn sample_container(id: &str, pid: libc::pid_t) -> Container {
        Container::new(
            id,
            pid,
            IdRange {
                host_start: 100000,
                container_start: 0,
                size: 65536,
            },
            IdRange {
                host_start: 100000,
                container_start: 0,
                size: 65536,
            },
            fp(pid as u64),
        )
    }

    #[test]
    fn register_then_lookup_by_pid() {
        let directory = InMemoryContainerDirectory::new();
        directory.register(sample_container("c1", 4242));

        let container = directory.lookup_by_pid(4242).expect("container found");
        assert_eq!(container.id, ContainerId::from("c1"));
    }

    #[test]
    fn unregister_removes_pid_mapping() {
        let directory = InMemoryContainerDirectory::new();
        directory.register(sample_container("c1", 4242));
        directory.unregister(&ContainerId::from("c1"));

        assert!(directory.lookup_by_pid(4242).is_none());
    }

    #[test]
    fn id_range_maps_container_id_to_host() {
        let range = IdRange {
            host_start: 100000,
            container_start: 0,
            size: 65536,
        };
        assert_eq!(range.map_to_host(0), Some(100000));
        assert_eq!(range.map_to_host(65536), None);
    }

    #[test]
    fn is_init_namespace_checks_fingerprint() {
        let container = sample_container("c1", 10);
        assert!(container.is_init_namespace(&fp(10)));
        assert!(!container.is_init_namespace(&fp(11)));
    }
}
