//! Emulated-resource descriptors.
//!
//! A descriptor is compile-time (really: registry-construction-time)
//! metadata for an emulated file or directory, per spec §3/§4.2. The `size`
//! field matters more than it looks: recent kernels treat a zero-length
//! `/proc` file as empty on read, so every descriptor backed by `/proc`
//! advertises a fixed non-zero size instead of the kernel's real size of 0.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// The advertised size for emulated files whose real kernel backing (always
/// a `/proc` node) reports 0. Large enough for any sysctl content this crate
/// emulates; see spec §4.2.
pub const EMULATED_PROC_FILE_SIZE: u64 = 32768;

/// The kind of an emulated resource: a plain file or a directory that can
/// have synthesized children spliced into its listing (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Directory,
}

/// Synthesized file metadata returned by `lookup`/`getattr`, mirroring the
/// `FileInfo` wire type of spec §6: `{name, size, mode, mtime, is_dir}`.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: DateTime<Utc>,
    pub is_dir: bool,
    /// Whether `getattr`/`lookup` should report `uid=0, gid=0` unconditionally
    /// rather than the container's mapped ids — the Open Question of spec §9,
    /// resolved here as a descriptor attribute. Default (see
    /// [EmulatedResource::new]) is `false` (remap ids), the conservative
    /// choice the spec calls for.
    pub skip_id_remap: bool,
}

impl FileInfo {
    /// Rewrites a zero-sized `/proc`-backed [FileInfo] (as returned verbatim
    /// by the kernel) to the advertised constant, per spec §4.2/§6.
    pub fn rewrite_proc_size(mut self) -> Self {
        if self.size == 0 {
            self.size = EMULATED_PROC_FILE_SIZE;
        }
        self
    }
}

/// Per-path metadata for one emulated resource: kind, mode, advertised size,
/// whether it is currently surfaced, and a lock scoped to this resource used
/// by write-through policies to serialize read-modify-write sequences
/// against the kernel (§3, §4.5).
pub struct EmulatedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub mode: u32,
    pub size: u64,
    enabled: Mutex<bool>,
    /// Serializes the read-compare-write sequence this resource's
    /// write-through policy performs against the kernel (§4.5, §5).
    pub lock: Mutex<()>,
    pub remap_ids: bool,
}

impl EmulatedResource {
    /// Constructs a file descriptor with the conservative default
    /// (`remap_ids: true`) per spec §9.
    pub fn file(name: impl Into<String>, mode: u32) -> Self {
        EmulatedResource {
            name: name.into(),
            kind: ResourceKind::File,
            mode,
            size: EMULATED_PROC_FILE_SIZE,
            enabled: Mutex::new(true),
            lock: Mutex::new(()),
            remap_ids: true,
        }
    }

    pub fn directory(name: impl Into<String>, mode: u32) -> Self {
        EmulatedResource {
            name: name.into(),
            kind: ResourceKind::Directory,
            mode,
            size: 0,
            enabled: Mutex::new(true),
            lock: Mutex::new(()),
            remap_ids: true,
        }
    }

    /// Marks this descriptor as exposed read-only with root/root identity,
    /// skipping uid/gid remapping — used for nodes like
    /// `/sys/devices/virtual/dmi/*` per spec §9.
    pub fn with_skip_id_remap(mut self) -> Self {
        self.remap_ids = false;
        self
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap()
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock().unwrap() = enabled;
    }

    /// Synthesizes the [FileInfo] this descriptor represents right now.
    pub fn file_info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            size: self.size,
            mode: self.mode,
            mtime: Utc::now(),
            is_dir: matches!(self.kind, ResourceKind::Directory),
            skip_id_remap: !self.remap_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_descriptor_advertises_nonzero_size() {
        let descriptor = EmulatedResource::file("cap_last_cap", 0o444);
        let info = descriptor.file_info();
        assert_eq!(info.name, "cap_last_cap");
        assert_eq!(info.mode, 0o444);
        assert!(!info.is_dir);
        assert!(info.size > 0);
    }

    #[test]
    fn rewrite_proc_size_only_touches_zero() {
        let info = FileInfo {
            name: "uptime".into(),
            size: 0,
            mode: 0o444,
            mtime: Utc::now(),
            is_dir: false,
            skip_id_remap: false,
        }
        .rewrite_proc_size();
        assert_eq!(info.size, EMULATED_PROC_FILE_SIZE);

        let info = FileInfo {
            name: "uptime".into(),
            size: 123,
            mode: 0o444,
            mtime: Utc::now(),
            is_dir: false,
            skip_id_remap: false,
        }
        .rewrite_proc_size();
        assert_eq!(info.size, 123);
    }

    #[test]
    fn skip_id_remap_flag_round_trips() {
        let descriptor = EmulatedResource::file("product_name", 0o444).with_skip_id_remap();
        assert!(descriptor.file_info().skip_id_remap);
    }

    #[test]
    fn disabled_descriptor_is_observable() {
        let descriptor = EmulatedResource::file("panic", 0o644);
        assert!(descriptor.is_enabled());
        descriptor.set_enabled(false);
        assert!(!descriptor.is_enabled());
    }
}
