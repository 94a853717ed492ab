//! The nsenter agent protocol (spec §4.3, §6).
//!
//! The agent is a short-lived helper that joins a container's namespaces
//! (every one but `mnt`) and performs exactly one filesystem primitive, then
//! reports back over a request/response channel. This module defines the
//! wire types and the [AgentClient] trait the passthrough handler dispatches
//! through; [protocol] contains the real `setns`-based implementation and
//! [fake] a test double.

pub mod fake;
pub mod protocol;

use crate::descriptor::FileInfo;
use serde_derive::{Deserialize, Serialize};

pub use fake::FakeAgent;
pub use protocol::NsenterClient;

/// Errors an agent dispatch can report. `Kernel` carries a raw errno the
/// agent observed performing the primitive inside the container; `Channel`
/// means the agent process itself is unreachable, which spec §4.7 treats as
/// fatal to the request (mapped to `EIO` at the boundary, never retried).
#[derive(Debug, Fail)]
pub enum AgentError {
    #[fail(display = "kernel reported errno {}", _0)]
    Kernel(i32),

    #[fail(display = "agent channel broken: {}", _0)]
    Channel(String),

    #[fail(display = "agent process could not be spawned: {}", _0)]
    Spawn(String),
}

impl AgentError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            AgentError::Kernel(errno) => *errno,
            AgentError::Channel(_) | AgentError::Spawn(_) => libc::EIO,
        }
    }
}

/// Which namespaces the agent should join before performing its primitive.
/// `mnt` is never included — see module docs and spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceSet {
    pub pid: bool,
    pub net: bool,
    pub ipc: bool,
    pub uts: bool,
    pub cgroup: bool,
    pub user: bool,
}

impl NamespaceSet {
    /// The set used for essentially every dispatch: join everything but
    /// mount.
    pub const ALL_BUT_MOUNT: NamespaceSet = NamespaceSet {
        pid: true,
        net: true,
        ipc: true,
        uts: true,
        cgroup: true,
        user: true,
    };

    /// Returns the `/proc/<pid>/ns/<name>` file names to `setns` into, in
    /// the order they should be joined (user first, so subsequent opens are
    /// resolved with the right privilege).
    pub fn ns_files(&self) -> Vec<&'static str> {
        let mut files = Vec::new();
        if self.user {
            files.push("user");
        }
        if self.uts {
            files.push("uts");
        }
        if self.ipc {
            files.push("ipc");
        }
        if self.net {
            files.push("net");
        }
        if self.cgroup {
            files.push("cgroup");
        }
        if self.pid {
            files.push("pid");
        }
        files
    }
}

/// A single request dispatched to the agent, per the wire table of spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsenterEvent {
    pub target_pid: libc::pid_t,
    #[serde(skip, default = "default_namespace_set")]
    pub namespaces: NamespaceSet,
    /// Whether the agent must `unshare` a fresh mount namespace (and mount a
    /// fresh `proc`/`sysfs` in it) after `setns`, so its own mounts stay
    /// invisible to the container while still reflecting the container's
    /// other namespaces. Always true for `/proc` and `/sys` targets.
    pub unshare_mount: bool,
    pub message: AgentMessage,
}

fn default_namespace_set() -> NamespaceSet {
    NamespaceSet::ALL_BUT_MOUNT
}

impl NsenterEvent {
    pub fn new(target_pid: libc::pid_t, unshare_mount: bool, message: AgentMessage) -> Self {
        NsenterEvent {
            target_pid,
            namespaces: NamespaceSet::ALL_BUT_MOUNT,
            unshare_mount,
            message,
        }
    }
}

/// The tagged request payload, one variant per row of spec §6's message
/// table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentMessage {
    Lookup { path: String },
    OpenFile { path: String, flags: i32, mode: u32 },
    ReadFile { path: String, offset: u64, len: usize },
    WriteFile { path: String, offset: u64, bytes: Vec<u8> },
    ReadDir { path: String },
    ReadLink { path: String },
}

/// The tagged response payload: success per-message-type, or an agent error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentResponsePayload {
    FileInfo(WireFileInfo),
    FileInfos(Vec<WireFileInfo>),
    Bytes(Vec<u8>),
    Ack,
    Link(String),
    Err(i32),
}

/// [FileInfo] is not itself (de)serializable (it carries a [chrono::DateTime]
/// with no serde feature enabled on this crate's dependency), so the wire
/// form trades `mtime` for a unix timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime_unix: i64,
    pub is_dir: bool,
}

impl From<&FileInfo> for WireFileInfo {
    fn from(info: &FileInfo) -> Self {
        WireFileInfo {
            name: info.name.clone(),
            size: info.size,
            mode: info.mode,
            mtime_unix: info.mtime.timestamp(),
            is_dir: info.is_dir,
        }
    }
}

impl WireFileInfo {
    pub fn into_file_info(self, skip_id_remap: bool) -> FileInfo {
        use chrono::TimeZone;
        FileInfo {
            name: self.name,
            size: self.size,
            mode: self.mode,
            mtime: chrono::Utc.timestamp_opt(self.mtime_unix, 0).single().unwrap_or_else(chrono::Utc::now),
            is_dir: self.is_dir,
            skip_id_remap,
        }
    }
}

/// What a successful agent dispatch returns, already unwrapped from the
/// wire envelope and converted to this crate's native types.
#[derive(Debug, Clone)]
pub enum AgentResponse {
    FileInfo(FileInfo),
    FileInfos(Vec<FileInfo>),
    Bytes(Vec<u8>),
    Ack,
    Link(String),
}

/// The interface the passthrough handler dispatches through. Implemented by
/// [NsenterClient] (forks and `setns`s a real helper) and [FakeAgent] (an
/// in-memory stand-in used by this crate's own tests).
pub trait AgentClient: Send + Sync {
    fn dispatch(&self, event: NsenterEvent) -> Result<AgentResponse, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_set_excludes_mount_always() {
        let set = NamespaceSet::ALL_BUT_MOUNT;
        let files = set.ns_files();
        assert!(!files.contains(&"mnt"));
        assert!(files.contains(&"pid"));
        assert!(files.contains(&"net"));
    }

    #[test]
    fn wire_file_info_round_trips() {
        let info = FileInfo {
            name: "uptime".into(),
            size: 32768,
            mode: 0o444,
            mtime: chrono::Utc::now(),
            is_dir: false,
            skip_id_remap: false,
        };
        let wire = WireFileInfo::from(&info);
        let back = wire.into_file_info(false);
        assert_eq!(back.name, "uptime");
        assert_eq!(back.size, 32768);
    }
}
