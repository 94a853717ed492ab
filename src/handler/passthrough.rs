//! The passthrough handler (spec §4.3): executes a request inside the
//! caller's container namespaces via the nsenter agent, hiding that the
//! overlay itself is mounted at `/proc` and `/sys`.

use super::{Handler, Request};
use crate::agent::{AgentClient, AgentMessage, AgentResponse, NsenterEvent};
use crate::descriptor::FileInfo;
use crate::error::OverlayError;
use crate::policy::KernelWriteThrough;
use std::sync::Arc;

/// Whether `path` lies under `/proc` or `/sys`, the condition under which
/// the agent must unshare a fresh mount namespace before performing its
/// primitive (spec §4.3).
fn needs_mount_unshare(path: &str) -> bool {
    path == "/proc"
        || path == "/sys"
        || path.starts_with("/proc/")
        || path.starts_with("/sys/")
}

/// Dispatches every operation to the nsenter agent, joining the caller's
/// container namespaces (every one but `mnt`) to perform it.
pub struct PassthroughHandler {
    agent: Arc<dyn AgentClient>,
}

impl PassthroughHandler {
    pub fn new(agent: Arc<dyn AgentClient>) -> Self {
        PassthroughHandler { agent }
    }

    fn dispatch(&self, req: &Request, message: AgentMessage) -> Result<AgentResponse, OverlayError> {
        let unshare_mount = needs_mount_unshare(req.path);
        let event = NsenterEvent::new(req.container.init_pid, unshare_mount, message);
        self.agent.dispatch(event).map_err(OverlayError::from)
    }

    /// A [KernelWriteThrough] view of this handler scoped to one path and
    /// caller, for the write-policy combinators (spec §4.5) to push through.
    pub fn kernel_write_through<'a>(&'a self, req: &'a Request<'a>) -> PassthroughKernel<'a> {
        PassthroughKernel { handler: self, req }
    }
}

impl Handler for PassthroughHandler {
    fn lookup(&self, req: &Request) -> Result<FileInfo, OverlayError> {
        match self.dispatch(
            req,
            AgentMessage::Lookup {
                path: req.path.to_string(),
            },
        )? {
            AgentResponse::FileInfo(info) => Ok(rewrite_if_proc(req.path, info)),
            _ => Err(OverlayError::KernelIo("unexpected agent response to Lookup".to_string())),
        }
    }

    fn open(&self, req: &Request, flags: i32, mode: u32) -> Result<(), OverlayError> {
        match self.dispatch(
            req,
            AgentMessage::OpenFile {
                path: req.path.to_string(),
                flags,
                mode,
            },
        )? {
            AgentResponse::Ack => Ok(()),
            _ => Err(OverlayError::KernelIo("unexpected agent response to OpenFile".to_string())),
        }
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>, OverlayError> {
        let init_ns = req.cache_eligible();

        if offset == 0 && init_ns {
            let cache = req.container.cache();
            let path = req.path.to_string();
            return cache
                .read_or_populate(&path, || self.fetch_from_kernel(req, offset, len))
                .map_err(OverlayError::from);
        }

        if offset != 0 && init_ns {
            return req
                .container
                .cache()
                .read_populated(req.path)
                .map(|full| slice_at(&full, offset, len))
                .map_err(OverlayError::from);
        }

        self.fetch_from_kernel(req, offset, len).map_err(OverlayError::from)
    }

    fn write(&self, req: &Request, offset: u64, data: &[u8]) -> Result<usize, OverlayError> {
        match self.dispatch(
            req,
            AgentMessage::WriteFile {
                path: req.path.to_string(),
                offset,
                bytes: data.to_vec(),
            },
        )? {
            AgentResponse::Ack => {
                if req.cache_eligible() {
                    req.container.cache().update(req.path, data.to_vec());
                }
                Ok(data.len())
            }
            _ => Err(OverlayError::KernelIo("unexpected agent response to WriteFile".to_string())),
        }
    }

    fn readdir(&self, req: &Request) -> Result<Vec<FileInfo>, OverlayError> {
        match self.dispatch(
            req,
            AgentMessage::ReadDir {
                path: req.path.to_string(),
            },
        )? {
            AgentResponse::FileInfos(infos) => Ok(infos
                .into_iter()
                .map(|info| rewrite_if_proc(req.path, info))
                .collect()),
            _ => Err(OverlayError::KernelIo("unexpected agent response to ReadDir".to_string())),
        }
    }

    fn readlink(&self, req: &Request) -> Result<String, OverlayError> {
        match self.dispatch(
            req,
            AgentMessage::ReadLink {
                path: req.path.to_string(),
            },
        )? {
            AgentResponse::Link(target) => Ok(target),
            _ => Err(OverlayError::KernelIo("unexpected agent response to ReadLink".to_string())),
        }
    }

    fn setattr(&self, req: &Request, mode: Option<u32>) -> Result<(), OverlayError> {
        // Implemented as an agent `open` with the mutated mode, per spec
        // §4.3. `O_RDONLY` since setattr doesn't need read/write access.
        self.open(req, libc::O_RDONLY, mode.unwrap_or(0o644))
    }
}

impl PassthroughHandler {
    fn fetch_from_kernel(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>, crate::cache::CacheError> {
        match self.dispatch(
            req,
            AgentMessage::ReadFile {
                path: req.path.to_string(),
                offset,
                len,
            },
        ) {
            Ok(AgentResponse::Bytes(bytes)) => Ok(bytes),
            Ok(_) => Err(crate::cache::CacheError::MissingAndNoPopulate(req.path.to_string())),
            Err(_) => Err(crate::cache::CacheError::MissingAndNoPopulate(req.path.to_string())),
        }
    }
}

fn rewrite_if_proc(path: &str, info: FileInfo) -> FileInfo {
    if path.starts_with("/proc") {
        info.rewrite_proc_size()
    } else {
        info
    }
}

fn slice_at(full: &[u8], offset: u64, len: usize) -> Vec<u8> {
    let offset = offset as usize;
    if offset >= full.len() {
        return Vec::new();
    }
    let end = (offset + len).min(full.len());
    full[offset..end].to_vec()
}

/// A [KernelWriteThrough] that pushes through a [PassthroughHandler] scoped
/// to one request.
pub struct PassthroughKernel<'a> {
    handler: &'a PassthroughHandler,
    req: &'a Request<'a>,
}

impl<'a> KernelWriteThrough for PassthroughKernel<'a> {
    fn write(&self, bytes: &[u8]) -> Result<(), crate::agent::AgentError> {
        match self.handler.dispatch(
            self.req,
            AgentMessage::WriteFile {
                path: self.req.path.to_string(),
                offset: 0,
                bytes: bytes.to_vec(),
            },
        ) {
            Ok(AgentResponse::Ack) => Ok(()),
            Ok(_) => Err(crate::agent::AgentError::Channel("unexpected response to WriteFile".to_string())),
            Err(OverlayError::Agent(e)) => Err(e),
            Err(_) => Err(crate::agent::AgentError::Channel("passthrough dispatch failed".to_string())),
        }
    }

    fn read(&self) -> Result<Vec<u8>, crate::agent::AgentError> {
        match self.handler.dispatch(
            self.req,
            AgentMessage::ReadFile {
                path: self.req.path.to_string(),
                offset: 0,
                len: crate::descriptor::EMULATED_PROC_FILE_SIZE as usize,
            },
        ) {
            Ok(AgentResponse::Bytes(bytes)) => Ok(bytes),
            Ok(_) => Err(crate::agent::AgentError::Channel("unexpected response to ReadFile".to_string())),
            Err(OverlayError::Agent(e)) => Err(e),
            Err(_) => Err(crate::agent::AgentError::Channel("passthrough dispatch failed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FakeAgent;
    use crate::container::{Container, ContainerId, IdRange};
    use crate::namespace::NsFingerprint;
    use std::sync::Arc;

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

    #[test]
    fn zero_sized_proc_file_is_rewritten_to_advertised_size() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        agent.seed_file(10, "/proc/uptime", b"12345.67 0.00\n", 0o444);
        let handler = PassthroughHandler::new(agent);
        let container = container(10);
        let req = request("/proc/uptime", &container, 10);

        let info = handler.lookup(&req).unwrap();
        assert!(info.size > 0);
    }

    #[test]
    fn read_at_offset_zero_populates_cache_then_serves_from_it() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        agent.seed_file(10, "/proc/sys/net/core/default_qdisc", b"fq_codel\n", 0o644);
        let handler = PassthroughHandler::new(agent);
        let container = container(10);
        let req = request("/proc/sys/net/core/default_qdisc", &container, 10);

        let first = handler.read(&req, 0, 64).unwrap();
        assert_eq!(first, b"fq_codel\n");
        assert_eq!(
            container.cache().peek("/proc/sys/net/core/default_qdisc").unwrap(),
            b"fq_codel\n"
        );
    }

    #[test]
    fn mount_unshare_is_required_for_proc_and_sys_but_not_elsewhere() {
        assert!(needs_mount_unshare("/proc"));
        assert!(needs_mount_unshare("/proc/sys/vm/overcommit_memory"));
        assert!(needs_mount_unshare("/sys"));
        assert!(needs_mount_unshare("/sys/devices/virtual"));

        assert!(!needs_mount_unshare("/etc/hostname"));
        assert!(!needs_mount_unshare("/procfs-lookalike"));
    }

    #[test]
    fn write_updates_both_kernel_and_cache() {
        let agent = Arc::new(FakeAgent::new(Vec::<String>::new()));
        agent.seed_file(10, "/proc/sys/net/core/default_qdisc", b"pfifo_fast\n", 0o644);
        let handler = PassthroughHandler::new(agent.clone());
        let container = container(10);
        let req = request("/proc/sys/net/core/default_qdisc", &container, 10);

        handler.write(&req, 0, b"fq_codel\n").unwrap();

        assert_eq!(
            agent.peek(10, "/proc/sys/net/core/default_qdisc").unwrap(),
            b"fq_codel\n"
        );
        assert_eq!(
            container.cache().peek("/proc/sys/net/core/default_qdisc").unwrap(),
            b"fq_codel\n"
        );
    }
}
