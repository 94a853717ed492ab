//! The handler protocol (spec §4, table row "Handler protocol"): a uniform
//! operation surface consumed by the front-end, implemented by
//! [passthrough::PassthroughHandler] and [emulated::EmulatedHandler].

pub mod emulated;
pub mod passthrough;
pub mod registry;

pub use emulated::EmulatedHandler;
pub use passthrough::PassthroughHandler;
pub use registry::HandlerRegistry;

use crate::container::Container;
use crate::descriptor::FileInfo;
use crate::error::OverlayError;
use crate::namespace::NsFingerprint;
use std::sync::Arc;

/// Everything a handler needs to know about the caller and the call, per
/// spec §3's "Handler request".
pub struct Request<'a> {
    pub path: &'a str,
    pub pid: libc::pid_t,
    pub uid: u32,
    pub gid: u32,
    pub container: Arc<Container>,
    pub caller_fingerprint: NsFingerprint,
    pub request_id: u64,
    pub no_cache: bool,
}

impl<'a> Request<'a> {
    /// Whether the cache may be consulted for this request: the caller must
    /// be in the container's init namespace set, and caching must not be
    /// disabled for this call (spec §4.4). Per-path overrides
    /// (`Config::no_cache_paths`, e.g. S6's `kernel/random/uuid`) are folded
    /// into `no_cache` by [crate::overlay::Overlay] before a handler ever
    /// sees the request, so handlers only need to check this one flag.
    pub fn cache_eligible(&self) -> bool {
        !self.no_cache && self.container.is_init_namespace(&self.caller_fingerprint)
    }
}

/// The uniform operation surface of spec §4's "Handler protocol" row.
pub trait Handler: Send + Sync {
    fn lookup(&self, req: &Request) -> Result<FileInfo, OverlayError>;

    fn open(&self, req: &Request, flags: i32, mode: u32) -> Result<(), OverlayError>;

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>, OverlayError>;

    fn write(&self, req: &Request, offset: u64, data: &[u8]) -> Result<usize, OverlayError>;

    fn readdir(&self, req: &Request) -> Result<Vec<FileInfo>, OverlayError>;

    fn readlink(&self, req: &Request) -> Result<String, OverlayError>;

    fn setattr(&self, req: &Request, mode: Option<u32>) -> Result<(), OverlayError>;

    fn close(&self, _req: &Request) -> Result<(), OverlayError> {
        Ok(())
    }
}
