//! An in-memory stand-in for the nsenter agent, used by this crate's own
//! tests. Real namespace entry is out of scope for a test double; instead
//! this simulates the *effect* namespace entry has: paths declared as
//! "global" are shared across every target pid (mirroring a kernel value
//! that is not namespaced, e.g. `nf_conntrack_max`), while all other paths
//! are partitioned per target pid (mirroring a value namespaced per
//! network/uts/etc. namespace, e.g. `net/core/default_qdisc`).

use super::{AgentClient, AgentError, AgentMessage, AgentResponse, NsenterEvent};
use crate::descriptor::FileInfo;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Clone)]
struct Node {
    content: Vec<u8>,
    mode: u32,
    is_dir: bool,
    children: Vec<String>,
}

/// A simulated kernel surface. Construct with [FakeAgent::new], seed
/// per-path content with [FakeAgent::seed], then hand it to an
/// [crate::handler::passthrough::PassthroughHandler] the same way a real
/// [super::NsenterClient] would be.
pub struct FakeAgent {
    global_paths: HashSet<String>,
    state: Mutex<HashMap<String, Node>>,
}

impl FakeAgent {
    pub fn new(global_paths: impl IntoIterator<Item = String>) -> Self {
        FakeAgent {
            global_paths: global_paths.into_iter().collect(),
            state: Mutex::new(HashMap::new()),
        }
    }

    fn scope(&self, pid: libc::pid_t, path: &str) -> String {
        if self.global_paths.contains(path) {
            format!("global:{}", path)
        } else {
            format!("{}:{}", pid, path)
        }
    }

    /// Seeds a file's content as every container (or, for a global path, the
    /// whole host) would initially see it.
    pub fn seed_file(&self, pid: libc::pid_t, path: &str, content: &[u8], mode: u32) {
        let key = self.scope(pid, path);
        self.state.lock().unwrap().insert(
            key,
            Node {
                content: content.to_vec(),
                mode,
                is_dir: false,
                children: Vec::new(),
            },
        );
    }

    /// Seeds a global path (shared across every pid) without requiring a
    /// representative pid.
    pub fn seed_global(&self, path: &str, content: &[u8], mode: u32) {
        self.state.lock().unwrap().insert(
            format!("global:{}", path),
            Node {
                content: content.to_vec(),
                mode,
                is_dir: false,
                children: Vec::new(),
            },
        );
    }

    pub fn seed_dir(&self, pid: libc::pid_t, path: &str, children: Vec<String>) {
        let key = self.scope(pid, path);
        self.state.lock().unwrap().insert(
            key,
            Node {
                content: Vec::new(),
                mode: 0o755,
                is_dir: true,
                children,
            },
        );
    }

    /// Reads back the current value for `path` as `pid` would see it, for
    /// test assertions.
    pub fn peek(&self, pid: libc::pid_t, path: &str) -> Option<Vec<u8>> {
        let key = self.scope(pid, path);
        self.state.lock().unwrap().get(&key).map(|n| n.content.clone())
    }
}

impl AgentClient for FakeAgent {
    fn dispatch(&self, event: NsenterEvent) -> Result<AgentResponse, AgentError> {
        let pid = event.target_pid;
        match event.message {
            AgentMessage::Lookup { path } => {
                let key = self.scope(pid, &path);
                let state = self.state.lock().unwrap();
                let node = state
                    .get(&key)
                    .ok_or(AgentError::Kernel(libc::ENOENT))?;
                Ok(AgentResponse::FileInfo(FileInfo {
                    name: crate::path::base_name(&path),
                    size: node.content.len() as u64,
                    mode: node.mode,
                    mtime: chrono::Utc::now(),
                    is_dir: node.is_dir,
                    skip_id_remap: false,
                }))
            }
            AgentMessage::OpenFile { .. } => Ok(AgentResponse::Ack),
            AgentMessage::ReadFile { path, offset, len } => {
                let key = self.scope(pid, &path);
                let state = self.state.lock().unwrap();
                let node = state
                    .get(&key)
                    .ok_or(AgentError::Kernel(libc::ENOENT))?;
                let offset = offset as usize;
                if offset >= node.content.len() {
                    return Ok(AgentResponse::Bytes(Vec::new()));
                }
                let end = (offset + len).min(node.content.len());
                Ok(AgentResponse::Bytes(node.content[offset..end].to_vec()))
            }
            AgentMessage::WriteFile { path, bytes, .. } => {
                let key = self.scope(pid, &path);
                let mut state = self.state.lock().unwrap();
                let node = state.entry(key).or_insert(Node {
                    content: Vec::new(),
                    mode: 0o644,
                    is_dir: false,
                    children: Vec::new(),
                });
                node.content = bytes;
                Ok(AgentResponse::Ack)
            }
            AgentMessage::ReadDir { path } => {
                let key = self.scope(pid, &path);
                let state = self.state.lock().unwrap();
                let node = state
                    .get(&key)
                    .ok_or(AgentError::Kernel(libc::ENOENT))?;
                let infos = node
                    .children
                    .iter()
                    .map(|name| FileInfo {
                        name: name.clone(),
                        size: 0,
                        mode: 0o644,
                        mtime: chrono::Utc::now(),
                        is_dir: false,
                        skip_id_remap: false,
                    })
                    .collect();
                Ok(AgentResponse::FileInfos(infos))
            }
            AgentMessage::ReadLink { path } => {
                let key = self.scope(pid, &path);
                let state = self.state.lock().unwrap();
                let node = state
                    .get(&key)
                    .ok_or(AgentError::Kernel(libc::ENOENT))?;
                Ok(AgentResponse::Link(String::from_utf8_lossy(&node.content).into_owned()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NsenterEvent;

    #[test]
    fn global_path_is_shared_across_pids() {
        let agent = FakeAgent::new(vec!["/proc/sys/net/netfilter/nf_conntrack_max".to_string()]);
        agent.seed_global("/proc/sys/net/netfilter/nf_conntrack_max", b"1000000\n", 0o644);

        agent
            .dispatch(NsenterEvent::new(
                1,
                true,
                AgentMessage::WriteFile {
                    path: "/proc/sys/net/netfilter/nf_conntrack_max".into(),
                    offset: 0,
                    bytes: b"2000000\n".to_vec(),
                },
            ))
            .unwrap();

        let seen_by_other_pid = agent
            .peek(2, "/proc/sys/net/netfilter/nf_conntrack_max")
            .unwrap();
        assert_eq!(seen_by_other_pid, b"2000000\n");
    }

    #[test]
    fn non_global_path_is_partitioned_per_pid() {
        let agent = FakeAgent::new(Vec::<String>::new());
        agent.seed_file(1, "/proc/sys/net/core/default_qdisc", b"pfifo_fast\n", 0o644);
        agent.seed_file(2, "/proc/sys/net/core/default_qdisc", b"pfifo_fast\n", 0o644);

        agent
            .dispatch(NsenterEvent::new(
                1,
                true,
                AgentMessage::WriteFile {
                    path: "/proc/sys/net/core/default_qdisc".into(),
                    offset: 0,
                    bytes: b"fq_codel\n".to_vec(),
                },
            ))
            .unwrap();

        assert_eq!(
            agent.peek(1, "/proc/sys/net/core/default_qdisc").unwrap(),
            b"fq_codel\n"
        );
        assert_eq!(
            agent.peek(2, "/proc/sys/net/core/default_qdisc").unwrap(),
            b"pfifo_fast\n"
        );
    }

    #[test]
    fn lookup_missing_path_returns_enoent() {
        let agent = FakeAgent::new(Vec::<String>::new());
        let result = agent.dispatch(NsenterEvent::new(
            1,
            true,
            AgentMessage::Lookup {
                path: "/proc/sys/does/not/exist".into(),
            },
        ));
        assert!(matches!(result, Err(AgentError::Kernel(e)) if e == libc::ENOENT));
    }
}
