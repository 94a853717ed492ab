//! Crate-wide error types and their mapping onto POSIX errno values.
//!
//! Every module boundary gets its own `failure`-derived error enum, the way
//! the teacher crate's `distribution::RegistryError` and
//! `image::manifest::ManifestError` do; [OverlayError] is the umbrella the
//! external interface (§6) actually returns, with an [OverlayError::errno]
//! conversion for handing a result back across the FUSE boundary.

use crate::agent::AgentError;
use crate::cache::CacheError;
use crate::policy::PolicyError;

/// Errors that can occur while resolving a path to a handler or a container.
#[derive(Debug, Fail)]
pub enum DispatchError {
    #[fail(display = "no container registered for pid {}", _0)]
    ContainerNotFound(libc::pid_t),

    #[fail(display = "handler registry has no handler registered at all (uninitialized)")]
    RegistryUninitialized,
}

/// The umbrella error type returned by every operation in [crate::overlay::Overlay].
#[derive(Debug, Fail)]
pub enum OverlayError {
    #[fail(display = "dispatch error: {}", _0)]
    Dispatch(#[cause] DispatchError),

    #[fail(display = "cache error: {}", _0)]
    Cache(#[cause] CacheError),

    #[fail(display = "policy error: {}", _0)]
    Policy(#[cause] PolicyError),

    #[fail(display = "agent error: {}", _0)]
    Agent(#[cause] AgentError),

    #[fail(display = "operation not permitted: {}", _0)]
    PermissionDenied(String),

    #[fail(display = "kernel I/O error: {}", _0)]
    KernelIo(String),
}

impl From<DispatchError> for OverlayError {
    fn from(e: DispatchError) -> Self {
        OverlayError::Dispatch(e)
    }
}

impl From<CacheError> for OverlayError {
    fn from(e: CacheError) -> Self {
        OverlayError::Cache(e)
    }
}

impl From<PolicyError> for OverlayError {
    fn from(e: PolicyError) -> Self {
        OverlayError::Policy(e)
    }
}

impl From<AgentError> for OverlayError {
    fn from(e: AgentError) -> Self {
        OverlayError::Agent(e)
    }
}

impl OverlayError {
    /// Maps this error onto the POSIX errno value the FUSE front-end should
    /// surface to the kernel, per spec §7.
    pub fn errno(&self) -> libc::c_int {
        match self {
            OverlayError::Dispatch(DispatchError::ContainerNotFound(_)) => libc::ENOENT,
            OverlayError::Dispatch(DispatchError::RegistryUninitialized) => libc::EIO,
            OverlayError::Cache(_) => libc::EIO,
            OverlayError::Policy(e) => e.errno(),
            OverlayError::Agent(e) => e.errno(),
            OverlayError::PermissionDenied(_) => libc::EACCES,
            OverlayError::KernelIo(_) => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_not_found_maps_to_enoent() {
        let e: OverlayError = DispatchError::ContainerNotFound(42).into();
        assert_eq!(e.errno(), libc::ENOENT);
    }
}
