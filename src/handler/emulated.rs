//! The generic emulated-resource handler (spec §2 "Concrete resource
//! handlers", §9 "Dispatch table replacing near-duplicate handlers").
//!
//! Rather than one hand-written handler type per resource, every
//! emulated directory is this one struct, configured by a `name ->
//! (descriptor, policy)` table. Reads of emulated children are served by
//! [PassthroughHandler] with caching; writes dispatch to the configured
//! [WritePolicy]; `readdir` splices the table's entries in ahead of the
//! kernel's own listing per spec §4.6.

use super::{Handler, PassthroughHandler, Request};
use crate::descriptor::{EmulatedResource, FileInfo};
use crate::error::OverlayError;
use crate::policy::WritePolicy;
use std::collections::HashMap;
use std::sync::Arc;

/// One entry in an [EmulatedHandler]'s table: the descriptor plus, for
/// writable children, the policy governing writes to it. Read-only entries
/// (e.g. `cap_last_cap`) carry `policy: None` and reject writes with
/// `EACCES`.
pub struct Child {
    pub descriptor: Arc<EmulatedResource>,
    pub policy: Option<WritePolicy>,
}

impl Child {
    pub fn writable(descriptor: EmulatedResource, policy: WritePolicy) -> Self {
        Child {
            descriptor: Arc::new(descriptor),
            policy: Some(policy),
        }
    }

    pub fn read_only(descriptor: EmulatedResource) -> Self {
        Child {
            descriptor: Arc::new(descriptor),
            policy: None,
        }
    }
}

/// A handler owning a base path and a table of emulated children, per spec
/// §3's "Handler" record.
pub struct EmulatedHandler {
    base_path: String,
    children: HashMap<String, Child>,
    passthrough: Arc<PassthroughHandler>,
    retries: u32,
    ignore_errors: bool,
}

impl EmulatedHandler {
    pub fn new(
        base_path: impl Into<String>,
        children: HashMap<String, Child>,
        passthrough: Arc<PassthroughHandler>,
        retries: u32,
        ignore_errors: bool,
    ) -> Self {
        EmulatedHandler {
            base_path: base_path.into(),
            children,
            passthrough,
            retries,
            ignore_errors,
        }
    }

    /// The descriptors this handler emulates, for registry splicing (spec
    /// §4.1, §4.6).
    pub fn descriptors(&self) -> Vec<Arc<EmulatedResource>> {
        self.children.values().map(|c| c.descriptor.clone()).collect()
    }

    fn child_for(&self, req: &Request) -> Option<&Child> {
        let name = crate::path::base_name(req.path);
        if crate::path::parent_of(req.path) != self.base_path {
            return None;
        }
        self.children.get(&name)
    }
}

impl Handler for EmulatedHandler {
    fn lookup(&self, req: &Request) -> Result<FileInfo, OverlayError> {
        if req.path == self.base_path {
            return Ok(FileInfo {
                name: crate::path::base_name(&self.base_path),
                size: 0,
                mode: 0o755,
                mtime: chrono::Utc::now(),
                is_dir: true,
                skip_id_remap: false,
            });
        }

        match self.child_for(req) {
            Some(child) if child.descriptor.is_enabled() => Ok(child.descriptor.file_info()),
            _ => self.passthrough.lookup(req),
        }
    }

    fn open(&self, req: &Request, flags: i32, mode: u32) -> Result<(), OverlayError> {
        if let Some(child) = self.child_for(req) {
            if child.descriptor.is_enabled() {
                let wants_write = flags & libc::O_ACCMODE != libc::O_RDONLY;
                if wants_write && child.policy.is_none() {
                    return Err(OverlayError::PermissionDenied(format!(
                        "{} is read-only",
                        req.path
                    )));
                }
                return Ok(());
            }
        }
        self.passthrough.open(req, flags, mode)
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>, OverlayError> {
        self.passthrough.read(req, offset, len)
    }

    fn write(&self, req: &Request, offset: u64, data: &[u8]) -> Result<usize, OverlayError> {
        let child = self.child_for(req).ok_or_else(|| {
            OverlayError::PermissionDenied(format!("{} has no emulated child to write", req.path))
        })?;

        let policy = child.policy.as_ref().ok_or_else(|| {
            OverlayError::PermissionDenied(format!("{} is read-only", req.path))
        })?;

        let _ = offset;
        let kernel = self.passthrough.kernel_write_through(req);
        policy
            .apply(
                &child.descriptor,
                req.path,
                req.container.cache(),
                &kernel,
                data,
                self.retries,
                self.ignore_errors,
            )
            .map_err(OverlayError::from)?;

        Ok(data.len())
    }

    fn readdir(&self, req: &Request) -> Result<Vec<FileInfo>, OverlayError> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();

        for child in self.children.values() {
            if !child.descriptor.is_enabled() {
                continue;
            }
            seen.insert(child.descriptor.name.clone());
            result.push(child.descriptor.file_info());
        }

        if let Ok(kernel_entries) = self.passthrough.readdir(req) {
            for entry in kernel_entries {
                if seen.contains(&entry.name) {
                    continue;
                }
                result.push(entry);
            }
        }

        Ok(result)
    }

    fn readlink(&self, req: &Request) -> Result<String, OverlayError> {
        self.passthrough.readlink(req)
    }

    fn setattr(&self, req: &Request, mode: Option<u32>) -> Result<(), OverlayError> {
        if self.child_for(req).is_some() {
            return Ok(());
        }
        self.passthrough.setattr(req, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FakeAgent;
    use crate::container::{Container, ContainerId, IdRange};
    use crate::namespace::NsFingerprint;

    fn fp(n: u64) -> NsFingerprint {
        NsFingerprint::new(n, n, n, n, n, n)
    }

    fn container(pid: libc::pid_t) -> Arc<Container> {
        Arc::new(Container::new(
            ContainerId::from("c1"),
            pid,
            IdRange {
                host_start: 0,
                container_start: 0,
                size: 0,
            },
            IdRange {
                host_start: 0,
                container_start: 0,
                size: 0,
            },
            fp(pid as u64),
        ))
    }

    fn request<'a>(path: &'a str, container: &Arc<Container>, pid: libc::pid_t) -> Request<'a> {
        Request {
            path,
            pid,
            uid: 0,
            gid: 0,
            container: container.clone(),
            caller_fingerprint: fp(pid as u64),
            request_id: 1,
            no_cache: false,
        }
    }

    fn vm_handler(agent: Arc<FakeAgent>) -> EmulatedHandler {
        let passthrough = Arc::new(PassthroughHandler::new(agent));
        let mut children = HashMap::new();
        children.insert(
            "overcommit_memory".to_string(),
            Child::writable(
                EmulatedResource::file("overcommit_memory", 0o644),
                WritePolicy::int(0, 2, true),
            ),
        );
        children.insert(
            "mmap_min_addr".to_string(),
            Child::writable(
                EmulatedResource::file("mmap_min_addr", 0o644),
                WritePolicy::max_int(true),
            ),
        );
        EmulatedHandler::new("/proc/sys/vm", children, passthrough, 5, false)
    }

    #[test]
    fn readdir_splices_emulated_children_before_kernel_and_dedups() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        agent.seed_dir(
            10,
            "/proc/sys/vm",
            vec!["overcommit_memory".to_string(), "swappiness".to_string()],
        );
        let handler = vm_handler(agent);
        let container = container(10);
        let req = request("/proc/sys/vm", &container, 10);

        let entries = handler.readdir(&req).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names.iter().filter(|n| **n == "overcommit_memory").count(), 1);
        assert!(names.contains(&"mmap_min_addr"));
        assert!(names.contains(&"swappiness"));
        assert_eq!(entries.len(), 3, "k emulated + n kernel - m overlap = 2 + 2 - 1 = 3");
    }

    #[test]
    fn write_out_of_range_returns_einval_and_leaves_state_untouched() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        agent.seed_file(10, "/proc/sys/vm/overcommit_memory", b"0\n", 0o644);
        let handler = vm_handler(agent.clone());
        let container = container(10);
        let req = request("/proc/sys/vm/overcommit_memory", &container, 10);

        let result = handler.write(&req, 0, b"5");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().errno(), libc::EINVAL);
        assert!(container.cache().peek("/proc/sys/vm/overcommit_memory").is_none());
        assert_eq!(agent.peek(10, "/proc/sys/vm/overcommit_memory").unwrap(), b"0\n");
    }

    #[test]
    fn read_only_child_rejects_write_open() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        let passthrough = Arc::new(PassthroughHandler::new(agent));
        let mut children = HashMap::new();
        children.insert(
            "cap_last_cap".to_string(),
            Child::read_only(EmulatedResource::file("cap_last_cap", 0o444)),
        );
        let handler = EmulatedHandler::new("/proc/sys/kernel", children, passthrough, 5, false);
        let container = container(10);
        let req = request("/proc/sys/kernel/cap_last_cap", &container, 10);

        let lookup = handler.lookup(&req).unwrap();
        assert_eq!(lookup.mode, 0o444);

        let result = handler.open(&req, libc::O_WRONLY, 0);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().errno(), libc::EACCES);
    }
}
