//! The top-level entry point (spec §6 "To the FUSE front-end"): resolves a
//! caller pid to its container, folds config-level cache overrides into the
//! request, and dispatches through the handler registry.

use crate::agent::AgentClient;
use crate::config::Config;
use crate::container::ContainerDirectory;
use crate::descriptor::FileInfo;
use crate::error::{DispatchError, OverlayError};
use crate::handler::{HandlerRegistry, PassthroughHandler, Request};
use crate::namespace::NsResolver;
use crate::resources;
use std::sync::Arc;

/// Ties the handler registry, the container-state collaborator, and the
/// namespace resolver together behind the one function-per-VFS-operation
/// surface the front-end calls (spec §6). Analogous to how the teacher
/// crate's `runtime::Runtime` composes a pull client and an unpacker behind a
/// single entry point.
pub struct Overlay {
    registry: HandlerRegistry,
    containers: Arc<dyn ContainerDirectory>,
    ns_resolver: Arc<dyn NsResolver>,
    config: Config,
}

impl Overlay {
    /// Builds an `Overlay` directly from an already-assembled registry. Used
    /// by tests and by embedders that need a registry shaped differently
    /// from the standard catalog; [Overlay::from_config] is the constructor
    /// that wires `config` into the catalog the usual way.
    pub fn new(
        registry: HandlerRegistry,
        containers: Arc<dyn ContainerDirectory>,
        ns_resolver: Arc<dyn NsResolver>,
        config: Config,
    ) -> Self {
        Overlay {
            registry,
            containers,
            ns_resolver,
            config,
        }
    }

    /// Builds the standard resource catalog (spec §4.8) over `agent` and
    /// wires `config.ignore_errors`/`config.write_through_retries` into it,
    /// so the write-policy combinators (§4.5) actually honor the config the
    /// embedder supplies rather than fixed literals. `config.agent_pool_size`
    /// is consumed earlier, by whoever constructs the
    /// [crate::agent::NsenterClient] passed in as `agent`.
    pub fn from_config(
        agent: Arc<dyn AgentClient>,
        containers: Arc<dyn ContainerDirectory>,
        ns_resolver: Arc<dyn NsResolver>,
        config: Config,
    ) -> Self {
        let passthrough = Arc::new(PassthroughHandler::new(agent));
        let registry = resources::build_registry(passthrough, config.write_through_retries, config.ignore_errors);
        Overlay::new(registry, containers, ns_resolver, config)
    }

    /// Resolves `pid` to its container and namespace fingerprint, and builds
    /// the per-call [Request], folding `Config::no_cache_paths` into
    /// `no_cache` so handlers never need direct config access (spec §4.4,
    /// §6's "container not registered" transition).
    fn build_request<'a>(
        &self,
        path: &'a str,
        pid: libc::pid_t,
        uid: u32,
        gid: u32,
        request_id: u64,
        no_cache: bool,
    ) -> Result<Request<'a>, OverlayError> {
        let container = self
            .containers
            .lookup_by_pid(pid)
            .ok_or(DispatchError::ContainerNotFound(pid))?;

        let caller_fingerprint = self
            .ns_resolver
            .fingerprint_of(pid)
            .unwrap_or(container.init_fingerprint);

        Ok(Request {
            path,
            pid,
            uid,
            gid,
            container,
            caller_fingerprint,
            request_id,
            no_cache: no_cache || self.config.is_no_cache_path(path),
        })
    }

    pub fn lookup(&self, path: &str, pid: libc::pid_t, uid: u32, gid: u32, request_id: u64) -> Result<FileInfo, OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, false)?;
        debug!("lookup({}) pid={}", path, pid);
        self.registry.find_handler(path).lookup(&req)
    }

    pub fn open(
        &self,
        path: &str,
        pid: libc::pid_t,
        uid: u32,
        gid: u32,
        request_id: u64,
        flags: i32,
        mode: u32,
    ) -> Result<(), OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, false)?;
        self.registry.find_handler(path).open(&req, flags, mode)
    }

    pub fn read(
        &self,
        path: &str,
        pid: libc::pid_t,
        uid: u32,
        gid: u32,
        request_id: u64,
        offset: u64,
        len: usize,
        no_cache: bool,
    ) -> Result<Vec<u8>, OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, no_cache)?;
        self.registry.find_handler(path).read(&req, offset, len)
    }

    pub fn write(
        &self,
        path: &str,
        pid: libc::pid_t,
        uid: u32,
        gid: u32,
        request_id: u64,
        offset: u64,
        data: &[u8],
        no_cache: bool,
    ) -> Result<usize, OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, no_cache)?;
        info!("write({}, {} bytes) pid={}", path, data.len(), pid);
        self.registry.find_handler(path).write(&req, offset, data)
    }

    pub fn readdir(&self, path: &str, pid: libc::pid_t, uid: u32, gid: u32, request_id: u64) -> Result<Vec<FileInfo>, OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, false)?;
        self.registry.find_handler(path).readdir(&req)
    }

    pub fn readlink(&self, path: &str, pid: libc::pid_t, uid: u32, gid: u32, request_id: u64) -> Result<String, OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, false)?;
        self.registry.find_handler(path).readlink(&req)
    }

    pub fn setattr(
        &self,
        path: &str,
        pid: libc::pid_t,
        uid: u32,
        gid: u32,
        request_id: u64,
        mode: Option<u32>,
    ) -> Result<(), OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, false)?;
        self.registry.find_handler(path).setattr(&req, mode)
    }

    /// `getattr` is `lookup` with a different name on the FUSE side (spec
    /// §6); both resolve to the same [crate::handler::Handler::lookup] call.
    pub fn getattr(&self, path: &str, pid: libc::pid_t, uid: u32, gid: u32, request_id: u64) -> Result<FileInfo, OverlayError> {
        self.lookup(path, pid, uid, gid, request_id)
    }

    pub fn close(&self, path: &str, pid: libc::pid_t, uid: u32, gid: u32, request_id: u64) -> Result<(), OverlayError> {
        let req = self.build_request(path, pid, uid, gid, request_id, false)?;
        self.registry.find_handler(path).close(&req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FakeAgent;
    use crate::container::{Container, ContainerId, IdRange, InMemoryContainerDirectory};
    use crate::namespace::{NsFingerprint, StaticNsResolver};
    use crate::resources;

    fn fp(n: u64) -> NsFingerprint {
        NsFingerprint::new(n, n, n, n, n, n)
    }

    fn id_range() -> IdRange {
        IdRange {
            host_start: 100000,
            container_start: 0,
            size: 65536,
        }
    }

    fn build(agent: Arc<FakeAgent>) -> (Overlay, Arc<InMemoryContainerDirectory>, Arc<StaticNsResolver>) {
        let directory = Arc::new(InMemoryContainerDirectory::new());
        let resolver = Arc::new(StaticNsResolver::new());

        let overlay = Overlay::from_config(agent, directory.clone(), resolver.clone(), Config::default());
        (overlay, directory, resolver)
    }

    #[test]
    fn from_config_threads_write_through_retries_and_ignore_errors_into_the_catalog() {
        let agent = Arc::new(FakeAgent::new(resources::globally_shared_paths()));
        agent.seed_global("/proc/sys/net/netfilter/nf_conntrack_max", b"1000000\n", 0o644);
        let directory = Arc::new(InMemoryContainerDirectory::new());
        let resolver = Arc::new(StaticNsResolver::new());

        let mut config = Config::default();
        config.write_through_retries = 1;
        config.ignore_errors = false;

        let overlay = Overlay::from_config(agent.clone(), directory.clone(), resolver.clone(), config);
        directory.register(Container::new(ContainerId::from("c1"), 10, id_range(), id_range(), fp(10)));
        resolver.set(10, fp(10));

        // A plain max-wins write with no concurrent collision succeeds regardless
        // of how many retries the config allows, confirming the catalog built by
        // `from_config` is wired up and usable end to end.
        overlay
            .write("/proc/sys/net/netfilter/nf_conntrack_max", 10, 0, 0, 1, 0, b"2000000", false)
            .unwrap();
        assert_eq!(
            agent.peek(10, "/proc/sys/net/netfilter/nf_conntrack_max").unwrap(),
            b"2000000\n"
        );
    }

    #[test]
    fn unregistered_pid_returns_enoent() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        let (overlay, _directory, resolver) = build(agent);
        resolver.set(999, fp(999));

        let result = overlay.lookup("/proc/sys/vm/overcommit_memory", 999, 0, 0, 1);
        assert!(matches!(result, Err(OverlayError::Dispatch(DispatchError::ContainerNotFound(999)))));
    }

    #[test]
    fn registered_container_can_read_emulated_resource() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        agent.seed_file(10, "/proc/sys/vm/overcommit_memory", b"0\n", 0o644);
        let (overlay, directory, resolver) = build(agent);

        directory.register(Container::new(ContainerId::from("c1"), 10, id_range(), id_range(), fp(10)));
        resolver.set(10, fp(10));

        let bytes = overlay
            .read("/proc/sys/vm/overcommit_memory", 10, 0, 0, 1, 0, 64, false)
            .unwrap();
        assert_eq!(bytes, b"0\n");
    }

    #[test]
    fn write_through_nf_conntrack_max_is_visible_to_a_second_container() {
        let agent = Arc::new(FakeAgent::new(resources::globally_shared_paths()));
        agent.seed_global("/proc/sys/net/netfilter/nf_conntrack_max", b"1000000\n", 0o644);
        let (overlay, directory, resolver) = build(agent.clone());

        directory.register(Container::new(ContainerId::from("c1"), 10, id_range(), id_range(), fp(10)));
        directory.register(Container::new(ContainerId::from("c2"), 20, id_range(), id_range(), fp(20)));
        resolver.set(10, fp(10));
        resolver.set(20, fp(20));

        overlay
            .write("/proc/sys/net/netfilter/nf_conntrack_max", 10, 0, 0, 1, 0, b"2000000", false)
            .unwrap();

        overlay
            .write("/proc/sys/net/netfilter/nf_conntrack_max", 20, 0, 0, 2, 0, b"500000", false)
            .unwrap();

        assert_eq!(
            agent.peek(99, "/proc/sys/net/netfilter/nf_conntrack_max").unwrap(),
            b"2000000\n",
            "the kernel-wide max must not have been lowered by the second container's smaller write"
        );
    }
}
