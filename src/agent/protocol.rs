//! The real nsenter agent: forks a helper process per dispatch that joins
//! the target's namespaces (everything but `mnt`), optionally unshares a
//! fresh mount namespace and mounts a fresh `proc`/`sysfs` in it, performs
//! one filesystem primitive, and reports the result back over a
//! [socketpair(2)]-backed channel.
//!
//! [socketpair(2)]: https://man7.org/linux/man-pages/man2/socketpair.2.html

use super::{AgentClient, AgentError, AgentMessage, AgentResponse, NsenterEvent, WireFileInfo};
use nix::fcntl::{open, OFlag};
use nix::mount::{mount, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Condvar, Mutex};

/// Bounds how many nsenter helpers may be forked at once, per spec §5 ("the
/// nsenter agent channel ... multiple agents may be pooled or spawned per
/// request"). Each [NsenterClient::dispatch] call acquires a permit, forks
/// one helper, and releases the permit when the helper reports back.
struct Semaphore {
    available: Mutex<usize>,
    freed: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Semaphore {
            available: Mutex::new(permits.max(1)),
            freed: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock().unwrap();
        while *available == 0 {
            available = self.freed.wait(available).unwrap();
        }
        *available -= 1;
    }

    fn release(&self) {
        *self.available.lock().unwrap() += 1;
        self.freed.notify_one();
    }
}

/// A pooled nsenter agent.
pub struct NsenterClient {
    pool: Semaphore,
}

impl NsenterClient {
    pub fn new(pool_size: usize) -> Self {
        NsenterClient {
            pool: Semaphore::new(pool_size),
        }
    }

    fn join_namespaces(&self, event: &NsenterEvent) -> nix::Result<()> {
        for ns in event.namespaces.ns_files() {
            let path = format!("/proc/{}/ns/{}", event.target_pid, ns);
            let fd = open(path.as_str(), OFlag::O_RDONLY, nix::sys::stat::Mode::empty())?;
            let owned = unsafe { OwnedFd::from_raw_fd(fd) };
            setns(owned.as_raw_fd(), CloneFlags::empty())?;
        }
        Ok(())
    }

    /// After joining every namespace but `mnt`, unshares a fresh mount
    /// namespace and remounts `proc`/`sysfs`, so subsequent path lookups see
    /// the container's view of the world without the container seeing the
    /// overlay's own bind mounts. See spec §4.3, "why not just enter the
    /// mount namespace too".
    fn prepare_mounts(&self) -> nix::Result<()> {
        unshare(CloneFlags::CLONE_NEWNS)?;
        mount(
            Some("proc"),
            "/proc",
            Some("proc"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            None::<&str>,
        )?;
        mount(
            Some("sysfs"),
            "/sys",
            Some("sysfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            None::<&str>,
        )?;
        Ok(())
    }

    /// Runs in the forked child: joins namespaces, optionally remounts, then
    /// performs the primitive and writes the serialized response to `sock`.
    fn child_main(&self, event: &NsenterEvent, mut sock: UnixStream) -> ! {
        let result = self.join_namespaces(event).map_err(to_agent_error).and_then(|_| {
            if event.unshare_mount {
                self.prepare_mounts().map_err(to_agent_error)?;
            }
            perform(&event.message)
        });

        let payload = match result {
            Ok(response) => response,
            Err(err) => super::AgentResponsePayload::Err(err.errno()),
        };

        let encoded = serde_json::to_vec(&payload).unwrap_or_else(|_| b"null".to_vec());
        let _ = sock.write_all(&(encoded.len() as u32).to_le_bytes());
        let _ = sock.write_all(&encoded);
        let _ = sock.flush();

        std::process::exit(0);
    }
}

fn to_agent_error(e: nix::Error) -> AgentError {
    AgentError::Kernel(e as i32)
}

/// Performs a single filesystem primitive directly (no further namespace
/// awareness needed: by this point the caller has already entered the
/// target's namespaces and mounted a fresh proc/sysfs).
fn perform(message: &AgentMessage) -> Result<super::AgentResponsePayload, AgentError> {
    use super::AgentResponsePayload as Payload;
    use std::fs;

    match message {
        AgentMessage::Lookup { path } => {
            let meta = fs::metadata(path).map_err(io_to_agent_error)?;
            Ok(Payload::FileInfo(metadata_to_wire(path, &meta)))
        }
        AgentMessage::OpenFile { path, flags, mode } => {
            use nix::fcntl::{open as nix_open, OFlag};
            use nix::sys::stat::Mode;
            let oflag = OFlag::from_bits_truncate(*flags);
            let mode = Mode::from_bits_truncate(*mode);
            nix_open(path.as_str(), oflag, mode)
                .map(|fd| {
                    let _ = unsafe { OwnedFd::from_raw_fd(fd) };
                })
                .map_err(to_agent_error)?;
            Ok(Payload::Ack)
        }
        AgentMessage::ReadFile { path, offset, len } => {
            use std::io::{Seek, SeekFrom};
            let mut file = fs::File::open(path).map_err(io_to_agent_error)?;
            file.seek(SeekFrom::Start(*offset)).map_err(io_to_agent_error)?;
            let mut buffer = vec![0u8; *len];
            let read = file.read(&mut buffer).map_err(io_to_agent_error)?;
            buffer.truncate(read);
            Ok(Payload::Bytes(buffer))
        }
        AgentMessage::WriteFile { path, offset, bytes } => {
            use std::io::{Seek, SeekFrom};
            use std::fs::OpenOptions;
            let mut file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(io_to_agent_error)?;
            file.seek(SeekFrom::Start(*offset)).map_err(io_to_agent_error)?;
            file.write_all(bytes).map_err(io_to_agent_error)?;
            Ok(Payload::Ack)
        }
        AgentMessage::ReadDir { path } => {
            let mut infos = Vec::new();
            for entry in fs::read_dir(path).map_err(io_to_agent_error)? {
                let entry = entry.map_err(io_to_agent_error)?;
                let meta = entry.metadata().map_err(io_to_agent_error)?;
                infos.push(metadata_to_wire(
                    &entry.file_name().to_string_lossy(),
                    &meta,
                ));
            }
            Ok(Payload::FileInfos(infos))
        }
        AgentMessage::ReadLink { path } => {
            let target = fs::read_link(path).map_err(io_to_agent_error)?;
            Ok(Payload::Link(target.to_string_lossy().into_owned()))
        }
    }
}

fn io_to_agent_error(e: std::io::Error) -> AgentError {
    AgentError::Kernel(e.raw_os_error().unwrap_or(libc::EIO))
}

fn metadata_to_wire(name: &str, meta: &std::fs::Metadata) -> WireFileInfo {
    use std::os::unix::fs::MetadataExt;
    WireFileInfo {
        name: crate::path::base_name(name),
        size: meta.len(),
        mode: meta.mode(),
        mtime_unix: meta.mtime(),
        is_dir: meta.is_dir(),
    }
}

impl NsenterClient {
    /// Forks the helper, joins namespaces, performs the primitive, and
    /// blocks until the child reports back. Runs on whichever thread calls
    /// it; [NsenterClient::dispatch] is what bounds how many of these run
    /// concurrently via the shared pool.
    fn fork_and_run(&self, event: NsenterEvent) -> Result<AgentResponse, AgentError> {
        let (parent_sock, child_sock) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .map_err(|e| AgentError::Spawn(e.to_string()))?;

        let parent_sock: UnixStream = UnixStream::from(parent_sock);
        let child_sock: UnixStream = UnixStream::from(child_sock);

        // SAFETY: fork() is only safe to call here because the child
        // immediately (a) joins namespaces, (b) performs exactly one
        // primitive, and (c) exits -- it never returns into arbitrary
        // application code or touches other threads' locks.
        match unsafe { fork() }.map_err(|e| AgentError::Spawn(e.to_string()))? {
            ForkResult::Child => {
                drop(parent_sock);
                self.child_main(&event, child_sock);
            }
            ForkResult::Parent { child } => {
                drop(child_sock);
                let response = read_response(parent_sock);
                let _ = waitpid(child, None);
                response
            }
        }
    }
}

impl AgentClient for NsenterClient {
    /// Acquires a pool permit, forks the helper, and blocks until it
    /// reports back, bounding how many agent helpers run concurrently to
    /// the configured pool size (spec §5). Cancellation (the caller aborting
    /// the in-flight call) is the embedder's responsibility: killing this
    /// thread's agent child and releasing its permit.
    fn dispatch(&self, event: NsenterEvent) -> Result<AgentResponse, AgentError> {
        self.pool.acquire();
        let result = self.fork_and_run(event);
        self.pool.release();
        result
    }
}

fn read_response(mut sock: UnixStream) -> Result<AgentResponse, AgentError> {
    let mut len_buf = [0u8; 4];
    sock.read_exact(&mut len_buf)
        .map_err(|e| AgentError::Channel(e.to_string()))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    sock.read_exact(&mut payload)
        .map_err(|e| AgentError::Channel(e.to_string()))?;

    let decoded: super::AgentResponsePayload =
        serde_json::from_slice(&payload).map_err(|e| AgentError::Channel(e.to_string()))?;

    match decoded {
        super::AgentResponsePayload::FileInfo(info) => {
            Ok(AgentResponse::FileInfo(info.into_file_info(false)))
        }
        super::AgentResponsePayload::FileInfos(infos) => Ok(AgentResponse::FileInfos(
            infos.into_iter().map(|i| i.into_file_info(false)).collect(),
        )),
        super::AgentResponsePayload::Bytes(bytes) => Ok(AgentResponse::Bytes(bytes)),
        super::AgentResponsePayload::Ack => Ok(AgentResponse::Ack),
        super::AgentResponsePayload::Link(target) => Ok(AgentResponse::Link(target)),
        super::AgentResponsePayload::Err(errno) => Err(AgentError::Kernel(errno)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_zero_is_clamped_to_one_permit() {
        let client = NsenterClient::new(0);
        assert_eq!(*client.pool.available.lock().unwrap(), 1);
    }
}
